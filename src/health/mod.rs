//! 健康探测模块
//!
//! 提供HTTP探测、结果分类、状态跟踪和探测调度功能

pub mod checker;
pub mod result;
pub mod scheduler;
pub mod tracker;

// 重新导出主要类型
pub use checker::{HttpProber, Prober};
pub use result::{AlertEvent, ProbeOutcome, ProbeResult, TargetStatus, TransportErrorKind};
pub use scheduler::{Coordinator, CoordinatorConfig, CoordinatorStatus};
pub use tracker::{transition, StateTracker, TargetState};
