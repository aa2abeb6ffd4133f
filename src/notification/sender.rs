//! 告警渠道模块
//!
//! 定义告警渠道trait和基础实现。核心逻辑只依赖 `send(AlertEvent)` 能力，
//! 不关心具体传输方式。

use crate::error::DispatchError;
use crate::health::AlertEvent;
use async_trait::async_trait;
use tracing::{info, warn};

/// 告警渠道trait
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// 渠道名称，用于日志和永久失败记录
    fn name(&self) -> &str;

    /// 发送一次告警事件
    ///
    /// # 参数
    /// * `event` - 状态迁移事件
    ///
    /// # 返回
    /// * `Result<(), DispatchError>` - 发送结果，失败时由分发器重试
    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError>;
}

/// 空的告警渠道实现（用于测试或禁用告警）
pub struct NoOpSink;

#[async_trait]
impl AlertSink for NoOpSink {
    fn name(&self) -> &str {
        "noop"
    }

    async fn send(&self, _event: &AlertEvent) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// 日志告警渠道，把每个事件写成结构化日志
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let detail = event.result.error_detail.as_deref().unwrap_or("N/A");
        if event.is_recovery() {
            info!(
                target_id = %event.target_id,
                from = ?event.from_status,
                to = ?event.to_status,
                latency_ms = event.result.latency_ms,
                idempotency_key = %event.idempotency_key(),
                "✅ 目标恢复: {}",
                event.target_id
            );
        } else {
            warn!(
                target_id = %event.target_id,
                from = ?event.from_status,
                to = ?event.to_status,
                outcome = ?event.result.outcome,
                status_code = ?event.result.status_code,
                idempotency_key = %event.idempotency_key(),
                "❌ 目标不可用: {} ({})",
                event.target_id,
                detail
            );
        }
        Ok(())
    }
}
