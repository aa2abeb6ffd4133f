//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Uptime Monitor - 多目标可用性监控调度器
#[derive(Parser, Debug, Clone)]
#[command(
    name = "uptime-monitor",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        env = "UPTIME_MONITOR_CONFIG",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// 日志级别（未指定时使用配置文件中的级别）
    #[arg(
        short,
        long,
        value_enum,
        help = "日志级别",
        env = "UPTIME_MONITOR_LOG_LEVEL",
        global = true
    )]
    pub log_level: Option<LogLevel>,

    /// 以JSON格式输出日志
    #[arg(long, help = "以JSON格式输出日志", global = true)]
    pub json_logs: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => log::LevelFilter::Trace,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 在前台启动监控，Ctrl+C 停止
    Start {
        /// 覆盖配置中的最大并发探测数
        #[arg(
            long,
            value_name = "COUNT",
            help = "最大并发探测数",
            env = "UPTIME_MONITOR_MAX_CONCURRENT"
        )]
        max_concurrent: Option<usize>,
    },

    /// 对目标执行一次性探测（不影响状态机）
    Check {
        /// 目标ID（可选，不指定则探测所有启用的目标）
        #[arg(value_name = "TARGET", help = "目标ID")]
        target: Option<String>,

        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 初始化配置文件
    Init {
        /// 配置文件路径
        #[arg(value_name = "FILE", default_value = "config.toml", help = "配置文件路径")]
        config_path: PathBuf,

        /// 是否覆盖现有文件
        #[arg(short, long, help = "覆盖现有文件")]
        force: bool,
    },

    /// 验证配置文件
    Validate {
        /// 配置文件路径
        #[arg(value_name = "FILE", help = "配置文件路径")]
        config_path: Option<PathBuf>,

        /// 是否显示详细信息
        #[arg(short, long, help = "显示详细信息")]
        verbose: bool,
    },

    /// 通过已配置的告警渠道发送一条测试告警
    TestAlert {
        /// 测试事件使用的目标ID
        #[arg(short, long, default_value = "test-target", help = "目标ID")]
        target: String,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

impl Args {
    /// 获取配置文件路径
    pub fn get_config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(crate::config::get_default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_check_command() {
        let args = Args::try_parse_from([
            "uptime-monitor",
            "--config",
            "/tmp/c.toml",
            "check",
            "api",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(args.get_config_path(), PathBuf::from("/tmp/c.toml"));
        match args.command {
            Commands::Check { target, format } => {
                assert_eq!(target.as_deref(), Some("api"));
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args =
            Args::try_parse_from(["uptime-monitor", "start", "--max-concurrent", "4", "-l", "debug"])
                .unwrap();
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert!(matches!(
            args.command,
            Commands::Start {
                max_concurrent: Some(4)
            }
        ));
    }

    #[test]
    fn test_init_defaults() {
        let args = Args::try_parse_from(["uptime-monitor", "init"]).unwrap();
        match args.command {
            Commands::Init { config_path, force } => {
                assert_eq!(config_path, PathBuf::from("config.toml"));
                assert!(!force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
