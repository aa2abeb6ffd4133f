//! 探测结果数据结构
//!
//! 定义探测结果、目标可用状态以及状态迁移产生的告警事件

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// 单次探测的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOutcome {
    /// HTTP状态码在 [200, 399] 区间
    Up,
    /// 收到HTTP响应，但状态码不在健康区间
    Down,
    /// 传输层失败（连接拒绝、DNS、TLS、超时）
    Error,
}

impl ProbeOutcome {
    /// 判断结果是否为健康
    pub fn is_healthy(&self) -> bool {
        matches!(self, ProbeOutcome::Up)
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Up => write!(f, "正常"),
            ProbeOutcome::Down => write!(f, "异常"),
            ProbeOutcome::Error => write!(f, "错误"),
        }
    }
}

/// 目标可用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    /// 尚未完成任何判定
    #[default]
    Unknown,
    /// 可用
    Up,
    /// 不可用
    Down,
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetStatus::Unknown => write!(f, "未知"),
            TargetStatus::Up => write!(f, "正常"),
            TargetStatus::Down => write!(f, "异常"),
        }
    }
}

/// 传输层错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorKind {
    /// 超过探测截止时间
    Timeout,
    /// 连接失败
    Connect,
    /// 域名解析失败
    Dns,
    /// TLS握手或证书错误
    Tls,
    /// 请求构建失败
    Request,
    /// 其他错误
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Other => "other",
        };
        write!(f, "{name}")
    }
}

/// 单次探测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// 探测ID
    pub id: Uuid,
    /// 目标ID
    pub target_id: String,
    /// 探测时间戳
    pub timestamp: DateTime<Utc>,
    /// 探测结果
    pub outcome: ProbeOutcome,
    /// 延迟（毫秒）
    pub latency_ms: u64,
    /// HTTP状态码（如果收到响应）
    pub status_code: Option<u16>,
    /// 错误详情
    pub error_detail: Option<String>,
    /// 传输错误类别（仅 Error 结果）
    pub error_kind: Option<TransportErrorKind>,
}

impl ProbeResult {
    /// 创建新的探测结果
    pub fn new(target_id: impl Into<String>, outcome: ProbeOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            timestamp: Utc::now(),
            outcome,
            latency_ms: 0,
            status_code: None,
            error_detail: None,
            error_kind: None,
        }
    }

    /// 设置HTTP状态码
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    /// 设置延迟
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    /// 设置错误详情
    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    /// 设置传输错误类别
    pub fn with_error_kind(mut self, kind: TransportErrorKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    /// 设置时间戳
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// 转换为JSON字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// 状态迁移告警事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// 目标ID
    pub target_id: String,
    /// 迁移前状态
    pub from_status: TargetStatus,
    /// 迁移后状态
    pub to_status: TargetStatus,
    /// 发生时间
    pub occurred_at: DateTime<Utc>,
    /// 触发迁移的探测结果
    pub result: ProbeResult,
}

impl AlertEvent {
    /// 幂等键：目标ID + 发生时间
    ///
    /// 投递语义为至少一次，下游依据该键去重
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}",
            self.target_id,
            self.occurred_at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )
    }

    /// 是否为恢复事件
    pub fn is_recovery(&self) -> bool {
        self.to_status == TargetStatus::Up
    }
}

/// Duration 以毫秒序列化
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_probe_outcome_is_healthy() {
        assert!(ProbeOutcome::Up.is_healthy());
        assert!(!ProbeOutcome::Down.is_healthy());
        assert!(!ProbeOutcome::Error.is_healthy());
    }

    #[test]
    fn test_probe_result_builder_pattern() {
        let result = ProbeResult::new("api", ProbeOutcome::Error)
            .with_latency(Duration::from_millis(1500))
            .with_error("Request timeout")
            .with_error_kind(TransportErrorKind::Timeout);

        assert_eq!(result.target_id, "api");
        assert_eq!(result.latency_ms, 1500);
        assert_eq!(result.status_code, None);
        assert_eq!(result.error_detail.as_deref(), Some("Request timeout"));
        assert_eq!(result.error_kind, Some(TransportErrorKind::Timeout));
    }

    #[test]
    fn test_probe_result_serialization_keeps_error_distinction() {
        let result = ProbeResult::new("api", ProbeOutcome::Error)
            .with_error_kind(TransportErrorKind::Dns)
            .with_error("DNS resolution failed");

        let json = result.to_json().unwrap();
        assert!(json.contains("\"outcome\": \"error\""));
        assert!(json.contains("\"error_kind\": \"dns\""));

        let back: ProbeResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
    }

    #[test]
    fn test_alert_event_idempotency_key() {
        let occurred_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let event = AlertEvent {
            target_id: "google".to_string(),
            from_status: TargetStatus::Unknown,
            to_status: TargetStatus::Down,
            occurred_at,
            result: ProbeResult::new("google", ProbeOutcome::Down).with_status_code(503),
        };

        assert_eq!(
            event.idempotency_key(),
            "google:2024-05-01T12:00:00.000000000Z"
        );
        assert!(!event.is_recovery());
    }

    #[test]
    fn test_target_status_default_is_unknown() {
        assert_eq!(TargetStatus::default(), TargetStatus::Unknown);
        assert_eq!(TargetStatus::Down.to_string(), "异常");
    }
}
