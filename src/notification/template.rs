//! 消息模板模块
//!
//! 使用Handlebars渲染告警和恢复消息

use crate::error::DispatchError;
use crate::health::AlertEvent;
use handlebars::Handlebars;
use serde_json::{json, Value};

const ALERT_TEMPLATE: &str = "alert";
const RECOVERY_TEMPLATE: &str = "recovery";

/// 告警消息模板
pub struct AlertTemplate {
    registry: Handlebars<'static>,
}

impl AlertTemplate {
    /// 使用默认模板创建
    pub fn new() -> Result<Self, DispatchError> {
        Self::with_templates(None, None)
    }

    /// 使用自定义模板创建，未提供的模板使用默认值
    ///
    /// # 参数
    /// * `alert` - 不可用告警模板
    /// * `recovery` - 恢复消息模板
    pub fn with_templates(
        alert: Option<&str>,
        recovery: Option<&str>,
    ) -> Result<Self, DispatchError> {
        let mut registry = Handlebars::new();
        registry.register_escape_fn(handlebars::no_escape);

        registry
            .register_template_string(ALERT_TEMPLATE, alert.unwrap_or(DEFAULT_ALERT_TEMPLATE))
            .map_err(|e| DispatchError::Config(format!("告警模板语法错误: {e}")))?;
        registry
            .register_template_string(
                RECOVERY_TEMPLATE,
                recovery.unwrap_or(DEFAULT_RECOVERY_TEMPLATE),
            )
            .map_err(|e| DispatchError::Config(format!("恢复模板语法错误: {e}")))?;

        Ok(Self { registry })
    }

    /// 渲染事件对应的消息
    pub fn render(&self, event: &AlertEvent) -> Result<String, DispatchError> {
        let name = if event.is_recovery() {
            RECOVERY_TEMPLATE
        } else {
            ALERT_TEMPLATE
        };
        self.registry
            .render(name, &template_context(event))
            .map_err(|e| DispatchError::Config(format!("模板渲染失败: {e}")))
    }
}

/// 构建模板上下文
fn template_context(event: &AlertEvent) -> Value {
    json!({
        "target_id": event.target_id,
        "from_status": event.from_status.to_string(),
        "to_status": event.to_status.to_string(),
        "occurred_at": event.occurred_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        "outcome": event.result.outcome,
        "status_code": event.result.status_code,
        "latency_ms": event.result.latency_ms,
        "error_detail": event.result.error_detail,
        "error_kind": event.result.error_kind,
        "idempotency_key": event.idempotency_key(),
    })
}

/// 默认的告警消息模板
pub const DEFAULT_ALERT_TEMPLATE: &str = r#"🚨 **目标不可用**
- **目标**: {{target_id}}
- **状态**: {{from_status}} → {{to_status}}
- **结果**: {{outcome}}{{#if status_code}} (HTTP {{status_code}}){{/if}}
- **延迟**: {{latency_ms}}ms
- **时间**: {{occurred_at}}{{#if error_detail}}
- **错误信息**: {{error_detail}}{{/if}}"#;

/// 默认的恢复消息模板
pub const DEFAULT_RECOVERY_TEMPLATE: &str = r#"✅ **目标恢复**
- **目标**: {{target_id}}
- **状态**: {{from_status}} → {{to_status}}
- **延迟**: {{latency_ms}}ms
- **恢复时间**: {{occurred_at}}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ProbeOutcome, ProbeResult, TargetStatus};

    fn event(outcome: ProbeOutcome, to_status: TargetStatus) -> AlertEvent {
        let result = ProbeResult::new("api", outcome).with_error("Connection refused");
        AlertEvent {
            target_id: "api".to_string(),
            from_status: TargetStatus::Up,
            to_status,
            occurred_at: result.timestamp,
            result,
        }
    }

    #[test]
    fn test_default_alert_template() {
        let template = AlertTemplate::new().unwrap();
        let text = template
            .render(&event(ProbeOutcome::Error, TargetStatus::Down))
            .unwrap();

        assert!(text.contains("目标不可用"));
        assert!(text.contains("api"));
        assert!(text.contains("error"));
        assert!(text.contains("Connection refused"));
        assert!(!text.contains("HTTP"));
    }

    #[test]
    fn test_recovery_uses_recovery_template() {
        let template = AlertTemplate::new().unwrap();
        let text = template
            .render(&event(ProbeOutcome::Up, TargetStatus::Up))
            .unwrap();
        assert!(text.contains("目标恢复"));
    }

    #[test]
    fn test_custom_template() {
        let template =
            AlertTemplate::with_templates(Some("{{target_id}} is {{to_status}}"), None).unwrap();
        let text = template
            .render(&event(ProbeOutcome::Down, TargetStatus::Down))
            .unwrap();
        assert_eq!(text, "api is 异常");
    }

    #[test]
    fn test_invalid_template_rejected() {
        let result = AlertTemplate::with_templates(Some("{{#if target_id}}"), None);
        assert!(matches!(result, Err(DispatchError::Config(_))));
    }
}
