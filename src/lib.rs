//! Uptime Monitor - 多目标可用性监控调度器
//!
//! 按目标各自的间隔探测HTTP端点，支持：
//! - 全局并发上限与单目标不重叠的调度
//! - 失败/恢复阈值防抖的状态机
//! - 带重试和幂等键的告警投递（Webhook、飞书）
//! - 配置热重载与只读状态接口
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod error;
pub mod health;
pub mod history;
pub mod logging;
pub mod notification;
pub mod registry;
pub mod service;
pub mod web;

// 重新导出主要类型
pub use config::{Config, GlobalConfig, TargetConfig};
pub use error::MonitorError;
pub use health::{AlertEvent, Coordinator, ProbeResult, StateTracker, TargetStatus};
pub use registry::{Target, TargetRegistry};
pub use service::MonitorService;

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
