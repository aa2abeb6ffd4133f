//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use crate::registry::{Target, VALID_METHODS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// 主配置结构，包含全局配置和目标列表
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 监控目标列表
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// 把启用的目标解析为注册表使用的 `Target`
    pub fn resolved_targets(&self) -> Vec<Target> {
        self.targets
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.resolve(&self.global))
            .collect()
    }
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 最大并发探测数
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_probes: usize,
    /// 默认探测间隔（秒）
    #[serde(default = "default_interval")]
    pub default_interval_seconds: u64,
    /// 默认探测超时（秒）
    #[serde(default = "default_timeout")]
    pub default_timeout_seconds: u64,
    /// 默认失败阈值
    #[serde(default = "default_failure_threshold")]
    pub default_failure_threshold: u32,
    /// 默认恢复阈值
    #[serde(default = "default_recovery_threshold")]
    pub default_recovery_threshold: u32,
    /// 定时任务首次探测前的最大随机延迟（毫秒）
    #[serde(default = "default_start_jitter")]
    pub max_start_jitter_ms: u64,
    /// 历史记录文件路径（JSON Lines）
    #[serde(default)]
    pub history_path: Option<String>,
    /// 告警配置
    #[serde(default)]
    pub alert: AlertConfig,
    /// Web 服务器配置
    #[serde(default)]
    pub web: Option<WebConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_concurrent_probes: default_max_concurrent(),
            default_interval_seconds: default_interval(),
            default_timeout_seconds: default_timeout(),
            default_failure_threshold: default_failure_threshold(),
            default_recovery_threshold: default_recovery_threshold(),
            max_start_jitter_ms: default_start_jitter(),
            history_path: None,
            alert: AlertConfig::default(),
            web: None,
        }
    }
}

/// 告警配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertConfig {
    /// 是否把状态迁移写入日志渠道
    #[serde(default = "default_true")]
    pub log_alerts: bool,
    /// 最大尝试次数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 首次重试等待（毫秒）
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// 最大重试等待（毫秒）
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// 退避倍数
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Webhook请求超时（秒）
    #[serde(default = "default_timeout")]
    pub webhook_timeout_seconds: u64,
    /// 通用Webhook列表
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
    /// 飞书机器人配置
    #[serde(default)]
    pub feishu: Option<FeishuConfig>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            log_alerts: true,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            webhook_timeout_seconds: default_timeout(),
            webhooks: Vec::new(),
            feishu: None,
        }
    }
}

/// 通用Webhook配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookConfig {
    /// 渠道名称，缺省时使用URL
    #[serde(default)]
    pub name: Option<String>,
    /// 投递地址
    pub url: String,
    /// 附加请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// 飞书机器人配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeishuConfig {
    /// 机器人webhook URL
    pub webhook_url: String,
    /// 签名密钥
    #[serde(default)]
    pub secret: Option<String>,
    /// 告警消息模板（Handlebars）
    #[serde(default)]
    pub template: Option<String>,
    /// 恢复消息模板（Handlebars）
    #[serde(default)]
    pub recovery_template: Option<String>,
}

/// Web 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebConfig {
    /// 是否启用
    #[serde(default)]
    pub enabled: bool,
    /// 绑定地址
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// 端口
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// 目标配置结构，未设置的字段使用全局默认值
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TargetConfig {
    /// 目标ID
    pub id: String,
    /// 目标URL
    pub url: String,
    /// HTTP方法
    #[serde(default = "default_method")]
    pub method: String,
    /// 探测间隔（秒）
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    /// 探测超时（秒）
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// 失败阈值
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    /// 恢复阈值
    #[serde(default)]
    pub recovery_threshold: Option<u32>,
    /// 是否启用
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl TargetConfig {
    /// 结合全局默认值解析为 `Target`
    pub fn resolve(&self, global: &GlobalConfig) -> Target {
        let mut target = Target::new(&self.id, &self.url)
            .with_method(&self.method)
            .with_interval(Duration::from_secs(
                self.interval_seconds
                    .unwrap_or(global.default_interval_seconds),
            ))
            .with_timeout(Duration::from_secs(
                self.timeout_seconds.unwrap_or(global.default_timeout_seconds),
            ))
            .with_thresholds(
                self.failure_threshold
                    .unwrap_or(global.default_failure_threshold),
                self.recovery_threshold
                    .unwrap_or(global.default_recovery_threshold),
            );
        for (key, value) in &self.headers {
            target = target.with_header(key, value);
        }
        target
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_concurrent() -> usize {
    50
}
fn default_interval() -> u64 {
    60
}
fn default_timeout() -> u64 {
    10
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_recovery_threshold() -> u32 {
    2
}
fn default_start_jitter() -> u64 {
    1000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8787
}
fn default_method() -> String {
    "GET".to_string()
}
fn default_true() -> bool {
    true
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    let global = &config.global;

    if global.default_interval_seconds == 0 {
        return Err("默认探测间隔不能为0".to_string());
    }
    if global.default_timeout_seconds == 0 {
        return Err("默认探测超时不能为0".to_string());
    }
    if global.default_failure_threshold == 0 || global.default_recovery_threshold == 0 {
        return Err("默认失败阈值和恢复阈值不能为0".to_string());
    }
    if global.max_concurrent_probes == 0 {
        return Err("最大并发探测数不能为0".to_string());
    }

    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&global.log_level.to_lowercase().as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            global.log_level, valid_log_levels
        ));
    }

    validate_alert_config(&global.alert)?;

    if let Some(ref web_config) = global.web {
        if web_config.enabled {
            if web_config.port == 0 {
                return Err("无效的Web服务器端口: 0".to_string());
            }
            if web_config.bind_address.trim().is_empty() {
                return Err("Web服务器绑定地址不能为空".to_string());
            }
        }
    }

    if config.targets.is_empty() {
        return Err("至少需要配置一个监控目标".to_string());
    }

    let mut seen = HashSet::new();
    for target in &config.targets {
        if target.id.trim().is_empty() {
            return Err("目标ID不能为空".to_string());
        }
        if !seen.insert(target.id.as_str()) {
            return Err(format!("目标ID重复: {}", target.id));
        }
        if !is_http_url(&target.url) {
            return Err(format!("目标 {} 的URL格式无效", target.id));
        }
        if !VALID_METHODS.contains(&target.method.to_uppercase().as_str()) {
            return Err(format!(
                "目标 {} 的HTTP方法 {} 无效，支持的方法: {:?}",
                target.id, target.method, VALID_METHODS
            ));
        }
        if target.interval_seconds == Some(0) {
            return Err(format!("目标 {} 的探测间隔不能为0", target.id));
        }
        if target.timeout_seconds == Some(0) {
            return Err(format!("目标 {} 的探测超时不能为0", target.id));
        }
        if target.failure_threshold == Some(0) {
            return Err(format!("目标 {} 的失败阈值不能为0", target.id));
        }
        if target.recovery_threshold == Some(0) {
            return Err(format!("目标 {} 的恢复阈值不能为0", target.id));
        }
    }

    Ok(())
}

fn validate_alert_config(alert: &AlertConfig) -> Result<(), String> {
    if alert.max_attempts == 0 {
        return Err("告警最大尝试次数不能为0".to_string());
    }
    if !alert.backoff_multiplier.is_finite() || alert.backoff_multiplier < 1.0 {
        return Err(format!(
            "告警退避倍数必须不小于1: {}",
            alert.backoff_multiplier
        ));
    }
    if alert.webhook_timeout_seconds == 0 {
        return Err("告警请求超时不能为0".to_string());
    }
    for webhook in &alert.webhooks {
        if !is_http_url(&webhook.url) {
            return Err(format!("告警webhook的URL格式无效: {}", webhook.url));
        }
    }
    if let Some(ref feishu) = alert.feishu {
        if !is_http_url(&feishu.webhook_url) {
            return Err("飞书webhook的URL格式无效".to_string());
        }
    }
    Ok(())
}
