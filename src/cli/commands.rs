//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{Config, ConfigLoader, TomlConfigLoader, DEFAULT_CONFIG_TEMPLATE};
use crate::error::{ConfigError, MonitorError, Result};
use crate::health::{AlertEvent, HttpProber, ProbeOutcome, ProbeResult, Prober, TargetStatus};
use crate::service::{build_dispatcher, open_history, MonitorService};
use async_trait::async_trait;
use futures::future::join_all;
use std::path::Path;
use tracing::info;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 加载配置文件，文件不存在时给出初始化提示
async fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: format!(
                "{}（请运行 '{} init' 创建默认配置文件）",
                path.display(),
                crate::APP_NAME
            ),
        }
        .into());
    }
    TomlConfigLoader::new(true).load_from_file(path).await
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

/// 初始化命令
pub struct InitCommand;

#[async_trait]
impl Command for InitCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Init { config_path, force } = &args.command {
            self.create_config_file(config_path, *force).await?;
        }
        Ok(())
    }
}

impl InitCommand {
    /// 写入默认配置文件
    ///
    /// # 返回
    /// * `Result<bool>` - 是否写入了文件，已存在且未指定 `force` 时返回 `false`
    pub async fn create_config_file(&self, config_path: &Path, force: bool) -> Result<bool> {
        if config_path.exists() && !force {
            eprintln!("配置文件已存在: {}", config_path.display());
            eprintln!("使用 --force 参数覆盖现有文件");
            return Ok(false);
        }

        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(config_path, DEFAULT_CONFIG_TEMPLATE).await?;

        println!("配置文件已创建: {}", config_path.display());
        println!("请编辑配置文件以添加需要监控的目标");
        Ok(true)
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate {
            config_path,
            verbose,
        } = &args.command
        {
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| args.get_config_path());
            self.validate_config_file(&config_file, *verbose).await?;
        }
        Ok(())
    }
}

impl ValidateCommand {
    /// 验证配置文件并返回解析结果
    pub async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<Config> {
        println!("验证配置文件: {}", config_path.display());
        let config = load_config(config_path).await?;

        if verbose {
            let global = &config.global;
            println!("配置验证通过！");
            println!("全局配置:");
            println!("  日志级别: {}", global.log_level);
            println!("  最大并发探测: {}", global.max_concurrent_probes);
            println!("  默认间隔: {}秒", global.default_interval_seconds);
            println!("  默认超时: {}秒", global.default_timeout_seconds);
            println!(
                "  阈值: 失败 {} / 恢复 {}",
                global.default_failure_threshold, global.default_recovery_threshold
            );
            println!(
                "  告警渠道: 日志={} webhook={} 飞书={}",
                global.alert.log_alerts,
                global.alert.webhooks.len(),
                global.alert.feishu.is_some()
            );

            println!("监控目标:");
            for (i, target) in config.targets.iter().enumerate() {
                let resolved = target.resolve(global);
                println!("  {}. {} ({})", i + 1, resolved.id, resolved.url);
                println!("     方法: {}", resolved.method);
                println!(
                    "     间隔/超时: {}秒 / {}秒",
                    resolved.interval.as_secs(),
                    resolved.timeout.as_secs()
                );
                println!(
                    "     阈值: 失败 {} / 恢复 {}",
                    resolved.failure_threshold, resolved.recovery_threshold
                );
                println!("     启用状态: {}", if target.enabled { "是" } else { "否" });
            }
        } else {
            println!("✓ 配置文件验证通过");
            println!("✓ 找到 {} 个监控目标", config.targets.len());
        }

        Ok(config)
    }
}

/// 单次探测命令
pub struct CheckCommand;

#[async_trait]
impl Command for CheckCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Check { target, format } = &args.command {
            let config = load_config(&args.get_config_path()).await?;
            let prober = HttpProber::new().map_err(|e| MonitorError::Other(e.into()))?;
            let results = self.probe_targets(&config, &prober, target.as_deref()).await;

            if results.is_empty() {
                match target {
                    Some(id) => eprintln!("未找到ID为 '{id}' 的启用目标"),
                    None => eprintln!("未找到任何启用的目标"),
                }
                return Ok(());
            }

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
                OutputFormat::Text => print_text_results(&results),
            }
        }
        Ok(())
    }
}

impl CheckCommand {
    /// 并发探测启用的目标，结果顺序与配置一致
    pub async fn probe_targets(
        &self,
        config: &Config,
        prober: &dyn Prober,
        target_id: Option<&str>,
    ) -> Vec<ProbeResult> {
        let targets: Vec<_> = config
            .resolved_targets()
            .into_iter()
            .filter(|t| target_id.is_none_or(|id| t.id == id))
            .collect();

        join_all(targets.iter().map(|t| prober.probe(t, t.timeout))).await
    }
}

/// 打印文本格式结果
fn print_text_results(results: &[ProbeResult]) {
    for result in results {
        let status_icon = if result.outcome.is_healthy() { "✓" } else { "✗" };
        let status_code = result
            .status_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        println!(
            "{} {} - {} - {} - {}ms",
            status_icon, result.target_id, result.outcome, status_code, result.latency_ms
        );

        if let Some(error) = &result.error_detail {
            println!("  错误: {error}");
        }
    }
}

/// 启动命令
pub struct StartCommand;

#[async_trait]
impl Command for StartCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Start { max_concurrent } = &args.command {
            let config_path = args.get_config_path();
            let mut config = load_config(&config_path).await?;
            if let Some(max) = max_concurrent {
                config.global.max_concurrent_probes = *max;
            }

            info!(
                "以前台模式启动监控，目标数量: {}",
                config.resolved_targets().len()
            );
            let service = MonitorService::build(config)
                .await?
                .with_config_path(&config_path);
            service.run().await?;
        }
        Ok(())
    }
}

/// 测试告警命令
pub struct TestAlertCommand;

#[async_trait]
impl Command for TestAlertCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::TestAlert { target } = &args.command {
            let config = load_config(&args.get_config_path()).await?;
            let history = open_history(&config.global).await?;
            let dispatcher = build_dispatcher(&config.global, history).await?;

            println!("发送测试告警到: {:?}", dispatcher.sink_names());
            match dispatcher.dispatch(&test_event(target)).await {
                Ok(()) => println!("✓ 测试告警发送成功"),
                Err(e) => {
                    eprintln!("✗ 测试告警发送失败: {e}");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }
}

/// 构造一条 `Unknown → Down` 的测试事件
pub fn test_event(target_id: &str) -> AlertEvent {
    let result = ProbeResult::new(target_id, ProbeOutcome::Down)
        .with_status_code(503)
        .with_error("这是一条测试告警");
    AlertEvent {
        target_id: target_id.to_string(),
        from_status: TargetStatus::Unknown,
        to_status: TargetStatus::Down,
        occurred_at: result.timestamp,
        result,
    }
}
