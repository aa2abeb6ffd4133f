//! 通知模块
//!
//! 提供告警渠道抽象、消息模板以及带重试退避的告警分发器

pub mod dispatcher;
pub mod feishu;
pub mod sender;
pub mod template;
pub mod webhook;

// 重新导出主要类型
pub use dispatcher::{AlertDispatcher, DispatchStats, PermanentFailure, RetryPolicy};
pub use feishu::FeishuSink;
pub use sender::{AlertSink, LogSink, NoOpSink};
pub use template::AlertTemplate;
pub use webhook::WebhookSink;
