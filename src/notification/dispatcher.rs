//! 告警分发器
//!
//! 把状态迁移事件投递到所有告警渠道。单个渠道失败时按指数退避重试，
//! 重试耗尽后记录永久失败，不会影响监控循环。

use crate::config::AlertConfig;
use crate::error::DispatchError;
use crate::health::AlertEvent;
use crate::history::{HistoryRecord, HistorySink};
use crate::logging::dispatch_log;
use crate::notification::sender::AlertSink;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// 重试策略
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 首次重试前的等待时间
    pub initial_backoff: Duration,
    /// 等待时间上限
    pub max_backoff: Duration,
    /// 退避倍数
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次尝试失败后的等待时间
    ///
    /// `initial_backoff * multiplier^(attempt-1)`，不超过 `max_backoff`
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap = self.max_backoff.as_millis() as f64;

        if !millis.is_finite() || millis >= cap {
            self.max_backoff
        } else {
            Duration::from_millis(millis.max(0.0) as u64)
        }
    }
}

impl From<&AlertConfig> for RetryPolicy {
    fn from(config: &AlertConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

/// 永久投递失败记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermanentFailure {
    /// 事件幂等键
    pub idempotency_key: String,
    /// 渠道名称
    pub sink: String,
    /// 已尝试次数
    pub attempts: u32,
    /// 最后一次错误
    pub last_error: String,
    /// 记录时间
    pub recorded_at: DateTime<Utc>,
    /// 原始事件
    pub event: AlertEvent,
}

/// 分发统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchStats {
    /// 收到的事件数
    pub total_events: u64,
    /// 成功投递次数（按渠道计）
    pub delivered: u64,
    /// 重试次数
    pub retries: u64,
    /// 永久失败次数
    pub permanent_failures: u64,
    /// 最近一次分发时间
    pub last_dispatch_at: Option<DateTime<Utc>>,
}

/// 内存中保留的永久失败记录上限，完整记录见历史存储
pub const DEFAULT_FAILURE_CAPACITY: usize = 256;

/// 告警分发器
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    policy: RetryPolicy,
    history: Option<Arc<dyn HistorySink>>,
    failures: Mutex<VecDeque<PermanentFailure>>,
    failure_capacity: usize,
    stats: Mutex<DispatchStats>,
}

impl AlertDispatcher {
    /// 创建新的告警分发器
    ///
    /// # 参数
    /// * `sinks` - 告警渠道列表
    /// * `policy` - 重试策略
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>, policy: RetryPolicy) -> Self {
        Self {
            sinks,
            policy,
            history: None,
            failures: Mutex::new(VecDeque::new()),
            failure_capacity: DEFAULT_FAILURE_CAPACITY,
            stats: Mutex::new(DispatchStats::default()),
        }
    }

    /// 设置历史存储，永久失败会写入其中
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    /// 设置内存中保留的永久失败记录数量，超出时丢弃最早的记录
    pub fn with_failure_capacity(mut self, capacity: usize) -> Self {
        self.failure_capacity = capacity.max(1);
        self
    }

    /// 已配置的渠道名称
    pub fn sink_names(&self) -> Vec<String> {
        self.sinks.iter().map(|s| s.name().to_string()).collect()
    }

    /// 重试策略
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 把事件投递到所有渠道
    ///
    /// 各渠道并发投递、互不影响。任一渠道重试耗尽时返回 `Exhausted`，
    /// 其余渠道照常完成。
    pub async fn dispatch(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        {
            let mut stats = self.stats.lock().await;
            stats.total_events += 1;
            stats.last_dispatch_at = Some(Utc::now());
        }

        let results = join_all(
            self.sinks
                .iter()
                .map(|sink| self.deliver_with_retry(sink.as_ref(), event)),
        )
        .await;

        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }

    /// 在独立任务中分发事件，调用方无需等待退避
    pub fn submit(self: &Arc<Self>, event: AlertEvent) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = dispatcher.dispatch(&event).await {
                warn!("告警分发未完全成功: {}", e);
            }
        })
    }

    /// 单个渠道的投递与重试
    async fn deliver_with_retry(
        &self,
        sink: &dyn AlertSink,
        event: &AlertEvent,
    ) -> Result<(), DispatchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match sink.send(event).await {
                Ok(()) => {
                    dispatch_log(sink.name(), event, attempt, None);
                    self.stats.lock().await.delivered += 1;
                    return Ok(());
                }
                Err(e) => {
                    last_error = e.to_string();
                    dispatch_log(sink.name(), event, attempt, Some(&last_error));
                    if attempt < max_attempts {
                        self.stats.lock().await.retries += 1;
                        tokio::time::sleep(self.policy.backoff_for(attempt)).await;
                    }
                }
            }
        }

        self.record_failure(sink.name(), event, max_attempts, &last_error)
            .await;
        Err(DispatchError::Exhausted {
            sink: sink.name().to_string(),
            attempts: max_attempts,
            last_error,
        })
    }

    async fn record_failure(
        &self,
        sink: &str,
        event: &AlertEvent,
        attempts: u32,
        last_error: &str,
    ) {
        let failure = PermanentFailure {
            idempotency_key: event.idempotency_key(),
            sink: sink.to_string(),
            attempts,
            last_error: last_error.to_string(),
            recorded_at: Utc::now(),
            event: event.clone(),
        };

        error!(
            sink = sink,
            target_id = %event.target_id,
            idempotency_key = %failure.idempotency_key,
            attempts = attempts,
            "告警永久投递失败: {}",
            last_error
        );

        if let Some(history) = &self.history {
            if let Err(e) = history
                .append(&HistoryRecord::PermanentFailure(failure.clone()))
                .await
            {
                warn!("写入永久失败记录失败: {}", e);
            }
        }

        self.stats.lock().await.permanent_failures += 1;
        let mut failures = self.failures.lock().await;
        while failures.len() >= self.failure_capacity {
            failures.pop_front();
        }
        failures.push_back(failure);
    }

    /// 最近的永久失败（由旧到新）
    pub async fn permanent_failures(&self) -> Vec<PermanentFailure> {
        self.failures.lock().await.iter().cloned().collect()
    }

    /// 分发统计快照
    pub async fn stats(&self) -> DispatchStats {
        self.stats.lock().await.clone()
    }
}
