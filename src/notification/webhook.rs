//! 通用Webhook告警渠道
//!
//! 以JSON POST方式投递告警事件，并通过 `Idempotency-Key` 请求头携带幂等键

use crate::error::DispatchError;
use crate::health::AlertEvent;
use crate::notification::sender::AlertSink;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// 幂等键请求头
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// 通用Webhook告警渠道
pub struct WebhookSink {
    /// 渠道名称
    name: String,
    /// HTTP客户端
    client: Client,
    /// 投递地址
    url: String,
    /// 附加请求头
    headers: HashMap<String, String>,
}

impl WebhookSink {
    /// 创建新的Webhook渠道
    ///
    /// # 参数
    /// * `name` - 渠道名称
    /// * `url` - 投递地址
    /// * `timeout` - 单次请求超时
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Config(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            name: name.into(),
            client,
            url: url.into(),
            headers: HashMap::new(),
        })
    }

    /// 设置附加请求头
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let idempotency_key = event.idempotency_key();
        let body = json!({
            "idempotency_key": idempotency_key,
            "event": event,
        });

        debug!("发送告警到webhook: {} ({})", self.url, idempotency_key);

        let mut request = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, &idempotency_key)
            .json(&body);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DispatchError::Rejected {
                status: response.status().as_u16(),
            })
        }
    }
}
