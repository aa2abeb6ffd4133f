//! 日志系统模块
//!
//! 提供结构化日志配置，以及探测、状态迁移和告警投递的结构化日志记录函数

use crate::health::{AlertEvent, ProbeResult};
use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, registry, EnvFilter, Layer};

/// 全局日志初始化状态
#[derive(Debug, Default)]
struct GlobalLoggingState {
    /// 是否已初始化
    initialized: bool,
    /// 初始化失败时的错误信息
    init_error: Option<String>,
    /// 当前配置
    current_config: Option<LogConfig>,
}

/// 全局日志状态管理器
static GLOBAL_LOGGING_STATE: OnceLock<Mutex<GlobalLoggingState>> = OnceLock::new();

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 日志文件路径（可选）
    pub file_path: Option<PathBuf>,
    /// 是否输出到控制台
    pub console: bool,
    /// 是否使用JSON格式
    pub json_format: bool,
    /// 模块级别日志控制
    pub module_levels: HashMap<String, LevelFilter>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            file_path: None,
            console: true,
            json_format: false,
            module_levels: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// 从级别字符串创建配置，无法识别时使用info
    pub fn from_level_str(level: &str) -> Self {
        Self {
            level: parse_level(level).unwrap_or(LevelFilter::Info),
            ..Self::default()
        }
    }

    /// 设置是否使用JSON格式
    pub fn with_json_format(mut self, json_format: bool) -> Self {
        self.json_format = json_format;
        self
    }
}

/// 解析日志级别字符串
pub fn parse_level(level: &str) -> Option<LevelFilter> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Some(LevelFilter::Off),
        "error" => Some(LevelFilter::Error),
        "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "debug" => Some(LevelFilter::Debug),
        "trace" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// 日志系统管理器
#[derive(Debug)]
pub struct LoggingSystem {
    config: LogConfig,
}

impl LoggingSystem {
    /// 初始化日志系统
    ///
    /// 重复调用不会重复安装全局subscriber
    ///
    /// # 参数
    /// * `config` - 日志配置
    ///
    /// # 返回
    /// * `Result<LoggingSystem, anyhow::Error>` - 初始化结果
    pub fn setup_logging(config: LogConfig) -> anyhow::Result<Self> {
        let state_mutex =
            GLOBAL_LOGGING_STATE.get_or_init(|| Mutex::new(GlobalLoggingState::default()));
        let mut state = state_mutex
            .lock()
            .map_err(|_| anyhow::anyhow!("日志状态锁已损坏"))?;

        if state.initialized {
            if let Some(e) = &state.init_error {
                return Err(anyhow::anyhow!("日志系统之前初始化失败: {}", e));
            }
            return Ok(Self { config });
        }

        let result = Self::perform_initialization(&config);
        state.initialized = true;
        state.current_config = Some(config.clone());
        state.init_error = result.as_ref().err().map(|e| e.to_string());
        result?;

        Ok(Self { config })
    }

    /// 当前实例使用的配置
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// 检查日志系统是否已初始化
    pub fn is_initialized() -> bool {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| state.lock().ok().map(|s| s.initialized))
            .unwrap_or(false)
    }

    /// 获取当前日志配置（如果已初始化）
    pub fn current_config() -> Option<LogConfig> {
        GLOBAL_LOGGING_STATE
            .get()
            .and_then(|state| state.lock().ok().and_then(|s| s.current_config.clone()))
    }

    fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
        Self::init_log_tracer()?;
        Self::init_tracing_subscriber(config)
    }

    /// 初始化 LogTracer（log crate 到 tracing 的桥接）
    fn init_log_tracer() -> anyhow::Result<()> {
        use tracing_log::LogTracer;

        static LOG_TRACER_INIT: OnceLock<Result<(), String>> = OnceLock::new();

        LOG_TRACER_INIT
            .get_or_init(|| LogTracer::init().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;
        Ok(())
    }

    /// 初始化 tracing subscriber
    fn init_tracing_subscriber(config: &LogConfig) -> anyhow::Result<()> {
        let mut env_filter = EnvFilter::from_default_env().add_directive(level_directive(config.level));

        for (module, level) in &config.module_levels {
            match format!("{}={}", module, level_name(*level)).parse::<Directive>() {
                Ok(directive) => env_filter = env_filter.add_directive(directive),
                Err(e) => return Err(anyhow::anyhow!("无效的模块日志级别 {}: {}", module, e)),
            }
        }

        let fmt_layer = if config.json_format {
            fmt::layer()
                .json()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_target(true)
                .boxed()
        } else {
            fmt::layer()
                .with_timer(fmt::time::ChronoUtc::rfc_3339())
                .with_ansi(true)
                .with_target(true)
                .boxed()
        };

        let result = match (&config.file_path, config.console) {
            (Some(file_path), false) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(file_path)
                    .map_err(|e| anyhow::anyhow!("创建日志文件失败: {}", e))?;
                let file_layer = fmt::layer()
                    .with_writer(file)
                    .with_timer(fmt::time::ChronoUtc::rfc_3339())
                    .with_ansi(false);
                registry().with(env_filter).with(file_layer).try_init()
            }
            _ => registry().with(env_filter).with(fmt_layer).try_init(),
        };

        match result {
            Ok(()) => {
                tracing::debug!("日志配置: {:?}", config);
                Ok(())
            }
            Err(e) => {
                let error_msg = e.to_string();
                // 测试中其他地方可能已经安装过全局subscriber
                if error_msg.contains("already been set")
                    || error_msg.contains("already initialized")
                {
                    tracing::debug!("日志系统已经初始化过了");
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("tracing subscriber初始化失败: {}", error_msg))
                }
            }
        }
    }
}

fn level_directive(level: LevelFilter) -> Directive {
    match level {
        LevelFilter::Off => Directive::from(tracing::level_filters::LevelFilter::OFF),
        LevelFilter::Error => Directive::from(tracing::Level::ERROR),
        LevelFilter::Warn => Directive::from(tracing::Level::WARN),
        LevelFilter::Info => Directive::from(tracing::Level::INFO),
        LevelFilter::Debug => Directive::from(tracing::Level::DEBUG),
        LevelFilter::Trace => Directive::from(tracing::Level::TRACE),
    }
}

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// 记录一次探测结果
pub fn probe_log(result: &ProbeResult) {
    tracing::debug!(
        log_type = "probe",
        target_id = %result.target_id,
        outcome = %result.outcome,
        status_code = ?result.status_code,
        latency_ms = result.latency_ms,
        error_kind = ?result.error_kind,
        error = result.error_detail.as_deref().unwrap_or(""),
        "PROBE: {} - {} ({}ms)",
        result.target_id,
        result.outcome,
        result.latency_ms
    );
}

/// 记录一次状态迁移
pub fn transition_log(event: &AlertEvent) {
    tracing::info!(
        log_type = "transition",
        target_id = %event.target_id,
        from = %event.from_status,
        to = %event.to_status,
        occurred_at = %event.occurred_at.to_rfc3339(),
        idempotency_key = %event.idempotency_key(),
        "TRANSITION: {} {} → {}",
        event.target_id,
        event.from_status,
        event.to_status
    );
}

/// 记录一次告警投递尝试
pub fn dispatch_log(sink: &str, event: &AlertEvent, attempt: u32, error: Option<&str>) {
    match error {
        None => tracing::info!(
            log_type = "dispatch",
            sink = sink,
            target_id = %event.target_id,
            attempt = attempt,
            success = true,
            "DISPATCH: {} → {} 成功 (第{}次)",
            event.target_id,
            sink,
            attempt
        ),
        Some(error) => tracing::warn!(
            log_type = "dispatch",
            sink = sink,
            target_id = %event.target_id,
            attempt = attempt,
            success = false,
            error = error,
            "DISPATCH: {} → {} 失败 (第{}次): {}",
            event.target_id,
            sink,
            attempt,
            error
        ),
    }
}
