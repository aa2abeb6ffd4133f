//! Uptime Monitor 主程序入口
//!
//! 多目标可用性监控调度器

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use uptime_monitor::cli::args::{Args, Commands};
use uptime_monitor::cli::commands::{
    CheckCommand, Command, InitCommand, StartCommand, TestAlertCommand, ValidateCommand,
    VersionCommand,
};
use uptime_monitor::config::{ConfigLoader, TomlConfigLoader};
use uptime_monitor::logging::{parse_level, LogConfig, LoggingSystem};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统
    let log_config = LogConfig {
        level: resolve_log_level(&args).await,
        console: true,
        json_format: args.json_logs,
        ..Default::default()
    };
    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Uptime Monitor v{} 启动", uptime_monitor::VERSION);

    // 执行命令
    if let Err(e) = execute_command(&args).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// 日志级别：命令行优先，其次配置文件，默认 info
async fn resolve_log_level(args: &Args) -> log::LevelFilter {
    if let Some(level) = args.log_level {
        return level.into();
    }

    let config_path = args.get_config_path();
    if !config_path.exists() {
        return log::LevelFilter::Info;
    }
    match TomlConfigLoader::new(true).load_from_file(&config_path).await {
        Ok(config) => parse_level(&config.global.log_level).unwrap_or(log::LevelFilter::Info),
        Err(_) => log::LevelFilter::Info,
    }
}

/// 执行CLI命令
async fn execute_command(args: &Args) -> Result<()> {
    let command: Box<dyn Command> = match &args.command {
        Commands::Start { .. } => Box::new(StartCommand),
        Commands::Check { .. } => Box::new(CheckCommand),
        Commands::Init { .. } => Box::new(InitCommand),
        Commands::Validate { .. } => Box::new(ValidateCommand),
        Commands::TestAlert { .. } => Box::new(TestAlertCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    };

    command.execute(args).await.map_err(|e| anyhow::anyhow!(e))
}
