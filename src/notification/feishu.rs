//! 飞书告警渠道模块
//!
//! 以交互式卡片的形式把告警事件发送到飞书机器人webhook

use crate::error::DispatchError;
use crate::health::AlertEvent;
use crate::notification::sender::AlertSink;
use crate::notification::template::AlertTemplate;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, error};

type HmacSha256 = Hmac<Sha256>;

/// 飞书告警渠道
pub struct FeishuSink {
    /// HTTP客户端
    client: Client,
    /// 机器人webhook URL
    webhook_url: String,
    /// 签名密钥（机器人开启签名校验时需要）
    secret: Option<String>,
    /// 消息模板
    template: AlertTemplate,
}

impl FeishuSink {
    /// 创建新的飞书渠道
    ///
    /// # 参数
    /// * `webhook_url` - 机器人webhook URL
    /// * `timeout` - 单次请求超时
    ///
    /// # 返回
    /// * `Result<Self, DispatchError>` - 渠道实例
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Config(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            webhook_url: webhook_url.into(),
            secret: None,
            template: AlertTemplate::new()?,
        })
    }

    /// 设置签名密钥
    pub fn with_secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }

    /// 设置消息模板
    pub fn with_template(mut self, template: AlertTemplate) -> Self {
        self.template = template;
        self
    }

    /// 构建卡片消息体
    fn build_message_body(&self, event: &AlertEvent) -> Result<Value, DispatchError> {
        let (title, color) = if event.is_recovery() {
            (format!("✅ 目标恢复 - {}", event.target_id), "green")
        } else {
            (format!("🚨 目标告警 - {}", event.target_id), "red")
        };
        let content = self.template.render(event)?;

        let mut body = json!({
            "msg_type": "interactive",
            "card": {
                "elements": [
                    {
                        "tag": "div",
                        "text": {
                            "content": content,
                            "tag": "lark_md"
                        }
                    }
                ],
                "header": {
                    "title": {
                        "content": title,
                        "tag": "plain_text"
                    },
                    "template": color
                }
            }
        });

        if let Some(secret) = &self.secret {
            let timestamp = Utc::now().timestamp();
            body["timestamp"] = json!(timestamp.to_string());
            body["sign"] = json!(sign(timestamp, secret)?);
        }

        Ok(body)
    }
}

/// 计算飞书签名
///
/// 以 `"{timestamp}\n{secret}"` 作为HMAC-SHA256密钥对空消息签名，再做base64编码
pub fn sign(timestamp: i64, secret: &str) -> Result<String, DispatchError> {
    let string_to_sign = format!("{timestamp}\n{secret}");
    let mac = HmacSha256::new_from_slice(string_to_sign.as_bytes())
        .map_err(|e| DispatchError::Config(format!("飞书签名密钥无效: {e}")))?;
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

#[async_trait]
impl AlertSink for FeishuSink {
    fn name(&self) -> &str {
        "feishu"
    }

    async fn send(&self, event: &AlertEvent) -> Result<(), DispatchError> {
        let body = self.build_message_body(event)?;
        debug!("发送消息到飞书webhook: {}", self.webhook_url);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            error!("飞书消息发送失败: {}", status);
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
            });
        }

        // 飞书在HTTP 200中通过code字段返回业务错误
        let reply: Value = response.json().await.unwrap_or(Value::Null);
        match reply.get("code").and_then(Value::as_i64) {
            Some(code) if code != 0 => {
                let msg = reply.get("msg").and_then(Value::as_str).unwrap_or("unknown");
                Err(DispatchError::Transport(format!("飞书返回错误: {code} {msg}")))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ProbeOutcome, ProbeResult, TargetStatus};
    use mockito::Matcher;

    fn event(to_status: TargetStatus) -> AlertEvent {
        let outcome = if to_status == TargetStatus::Up {
            ProbeOutcome::Up
        } else {
            ProbeOutcome::Down
        };
        let result = ProbeResult::new("api", outcome).with_status_code(502);
        AlertEvent {
            target_id: "api".to_string(),
            from_status: TargetStatus::Up,
            to_status,
            occurred_at: result.timestamp,
            result,
        }
    }

    #[test]
    fn test_sign_is_deterministic() {
        let a = sign(1_700_000_000, "secret").unwrap();
        let b = sign(1_700_000_000, "secret").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, sign(1_700_000_001, "secret").unwrap());
        // HMAC-SHA256 输出32字节，base64后44个字符
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn test_card_color_and_signature() {
        let sink = FeishuSink::new("http://localhost/hook", Duration::from_secs(5))
            .unwrap()
            .with_secret(Some("s3cr3t".to_string()));

        let alert = sink.build_message_body(&event(TargetStatus::Down)).unwrap();
        assert_eq!(alert["card"]["header"]["template"], "red");
        assert!(alert["sign"].is_string());
        assert!(alert["timestamp"].is_string());

        let recovery = sink.build_message_body(&event(TargetStatus::Up)).unwrap();
        assert_eq!(recovery["card"]["header"]["template"], "green");
    }

    #[test]
    fn test_empty_secret_disables_signing() {
        let sink = FeishuSink::new("http://localhost/hook", Duration::from_secs(5))
            .unwrap()
            .with_secret(Some(String::new()));
        let body = sink.build_message_body(&event(TargetStatus::Down)).unwrap();
        assert!(body.get("sign").is_none());
    }

    #[tokio::test]
    async fn test_send_success_and_business_error() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("POST", "/ok")
            .match_body(Matcher::PartialJson(json!({"msg_type": "interactive"})))
            .with_status(200)
            .with_body(r#"{"code":0,"msg":"success"}"#)
            .create_async()
            .await;
        let _bad = server
            .mock("POST", "/bad")
            .with_status(200)
            .with_body(r#"{"code":19021,"msg":"sign match fail"}"#)
            .create_async()
            .await;

        let sink = FeishuSink::new(format!("{}/ok", server.url()), Duration::from_secs(5)).unwrap();
        tokio_test::assert_ok!(sink.send(&event(TargetStatus::Down)).await);
        ok.assert_async().await;

        let sink =
            FeishuSink::new(format!("{}/bad", server.url()), Duration::from_secs(5)).unwrap();
        let err = sink.send(&event(TargetStatus::Down)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(msg) if msg.contains("19021")));
    }
}
