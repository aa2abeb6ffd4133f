//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use thiserror::Error;

/// Uptime Monitor 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum MonitorError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 目标注册表错误
    #[error("目标注册表错误: {0}")]
    Registry(#[from] RegistryError),

    /// 告警投递错误
    #[error("告警投递错误: {0}")]
    Dispatch(#[from] DispatchError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 目标注册表错误类型
///
/// 注册表误用会直接返回给调用方
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// 目标ID重复
    #[error("目标ID重复: {0}")]
    DuplicateId(String),

    /// 目标不存在
    #[error("目标不存在: {0}")]
    NotFound(String),

    /// 目标配置无效
    #[error("目标 {id} 配置无效: {reason}")]
    InvalidTarget { id: String, reason: String },
}

/// 状态跟踪器错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// 目标已被移除（或已重新注册），结果被丢弃
    #[error("目标状态不存在: {0}")]
    NotFound(String),
}

/// 告警投递错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// 网络传输失败
    #[error("告警发送失败: {0}")]
    Transport(String),

    /// 接收端拒绝
    #[error("告警被接收端拒绝: HTTP {status}")]
    Rejected { status: u16 },

    /// 重试次数耗尽
    #[error("告警投递重试耗尽: sink={sink}, 尝试次数={attempts}, 最后错误={last_error}")]
    Exhausted {
        sink: String,
        attempts: u32,
        last_error: String,
    },

    /// 告警渠道配置错误
    #[error("告警渠道配置错误: {0}")]
    Config(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        assert_eq!(
            RegistryError::DuplicateId("api".to_string()).to_string(),
            "目标ID重复: api"
        );
        assert_eq!(
            RegistryError::NotFound("api".to_string()).to_string(),
            "目标不存在: api"
        );
    }

    #[test]
    fn test_monitor_error_from_conversions() {
        let err: MonitorError = RegistryError::NotFound("x".to_string()).into();
        assert!(matches!(err, MonitorError::Registry(_)));

        let err: MonitorError = DispatchError::Rejected { status: 500 }.into();
        assert!(err.to_string().contains("HTTP 500"));

        let err: MonitorError = ConfigError::EnvVarError {
            var: "TOKEN".to_string(),
        }
        .into();
        assert!(err.to_string().contains("TOKEN"));
    }
}
