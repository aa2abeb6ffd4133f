//! 配置加载器实现
//!
//! 提供TOML配置文件解析、环境变量替换和错误处理功能

use crate::config::types::{validate_config, Config};
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use regex::Regex;
use std::path::{Path, PathBuf};

/// 配置加载器trait，定义配置加载接口
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    /// 从文件加载配置
    ///
    /// # 参数
    /// * `path` - 配置文件路径
    ///
    /// # 返回
    /// * `Result<Config>` - 加载的配置或错误
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<Config>;

    /// 从字符串加载配置
    async fn load_from_string(&self, content: &str) -> Result<Config>;

    /// 验证配置
    fn validate(&self, config: &Config) -> Result<()>;
}

/// TOML配置加载器实现
#[derive(Debug, Clone)]
pub struct TomlConfigLoader {
    /// 是否启用环境变量替换
    enable_env_substitution: bool,
}

impl Default for TomlConfigLoader {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TomlConfigLoader {
    /// 创建新的TOML配置加载器
    ///
    /// # 参数
    /// * `enable_env_substitution` - 是否启用 `${VAR}` 环境变量替换
    pub fn new(enable_env_substitution: bool) -> Self {
        Self {
            enable_env_substitution,
        }
    }

    /// 替换字符串中的 `${VAR}` 环境变量，变量不存在时报错
    fn substitute_env_vars(&self, content: &str) -> Result<String> {
        if !self.enable_env_substitution {
            return Ok(content.to_string());
        }

        let env_var_regex = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
            .map_err(|e| ConfigError::ParseError(format!("正则表达式错误: {e}")))?;

        let mut result = String::with_capacity(content.len());
        let mut last_end = 0;
        for captures in env_var_regex.captures_iter(content) {
            let (Some(full_match), Some(var_name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let value = std::env::var(var_name.as_str()).map_err(|_| ConfigError::EnvVarError {
                var: var_name.as_str().to_string(),
            })?;

            result.push_str(&content[last_end..full_match.start()]);
            result.push_str(&value);
            last_end = full_match.end();
        }
        result.push_str(&content[last_end..]);

        Ok(result)
    }

    /// 解析TOML内容
    fn parse_toml(&self, content: &str) -> Result<Config> {
        let processed_content = self.substitute_env_vars(content)?;
        let config: Config = toml::from_str(&processed_content)
            .map_err(|e| ConfigError::ParseError(format!("TOML解析失败: {e}")))?;
        Ok(config)
    }
}

#[async_trait]
impl ConfigLoader for TomlConfigLoader {
    async fn load_from_file<P: AsRef<Path> + Send>(&self, path: P) -> Result<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string_lossy().to_string(),
            }
            .into());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::ParseError(format!("读取文件失败: {e}")))?;

        let config = self.parse_toml(&content)?;
        self.validate(&config)?;

        log::info!("成功加载配置文件: {}", path.display());
        log::debug!("配置内容: {:?}", config);

        Ok(config)
    }

    async fn load_from_string(&self, content: &str) -> Result<Config> {
        let config = self.parse_toml(content)?;
        self.validate(&config)?;
        log::debug!("成功解析配置字符串");
        Ok(config)
    }

    fn validate(&self, config: &Config) -> Result<()> {
        validate_config(config).map_err(|e| ConfigError::ValidationError(e).into())
    }
}

/// 获取默认配置文件路径
///
/// 当前目录存在 `config.toml` 时优先使用，否则使用
/// `<系统配置目录>/uptime-monitor/config.toml`
pub fn get_default_config_path() -> PathBuf {
    let local = PathBuf::from("config.toml");
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .map(|config_dir| config_dir.join(crate::APP_NAME).join("config.toml"))
        .unwrap_or(local)
}

/// 默认配置文件内容
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Uptime Monitor 配置文件

[global]
# 日志级别: trace, debug, info, warn, error
log_level = "info"
# 全局最大并发探测数
max_concurrent_probes = 50
# 目标未设置时使用的默认值
default_interval_seconds = 60
default_timeout_seconds = 10
default_failure_threshold = 3
default_recovery_threshold = 2
# 定时任务首次探测前的最大随机延迟（毫秒）
max_start_jitter_ms = 1000
# 历史记录文件（JSON Lines），不需要时删除此行
# history_path = "history.jsonl"

[global.alert]
# 把状态迁移写入日志
log_alerts = true
# 告警投递重试策略
max_attempts = 5
initial_backoff_ms = 500
max_backoff_ms = 30000
backoff_multiplier = 2.0
webhook_timeout_seconds = 10

# 通用Webhook，可配置多个；支持环境变量替换
# [[global.alert.webhooks]]
# url = "https://hooks.example.com/uptime"

# 飞书机器人
# [global.alert.feishu]
# webhook_url = "https://open.feishu.cn/open-apis/bot/v2/hook/your-token"

[global.web]
enabled = false
bind_address = "127.0.0.1"
port = 8787

[[targets]]
id = "google"
url = "https://www.google.com"
method = "GET"
interval_seconds = 600
timeout_seconds = 10
failure_threshold = 3
recovery_threshold = 2
enabled = true
"#;
