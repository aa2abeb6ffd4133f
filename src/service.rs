//! 服务管理模块
//!
//! 根据配置组装注册表、探测器、状态跟踪器、告警分发器和协调器，
//! 并负责前台运行期间的热重载、Web接口和优雅关闭

use crate::config::{AlertConfig, Config, ConfigWatcher, GlobalConfig};
use crate::error::DispatchError;
use crate::health::{Coordinator, CoordinatorConfig, HttpProber, Prober, StateTracker};
use crate::history::{HistorySink, JsonlHistory};
use crate::notification::{
    AlertDispatcher, AlertSink, AlertTemplate, FeishuSink, LogSink, RetryPolicy, WebhookSink,
};
use crate::registry::TargetRegistry;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// 配置文件热重载防抖时间
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(500);

/// 根据告警配置构建告警渠道
pub fn build_sinks(alert: &AlertConfig) -> Result<Vec<Arc<dyn AlertSink>>, DispatchError> {
    let timeout = Duration::from_secs(alert.webhook_timeout_seconds);
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();

    if alert.log_alerts {
        sinks.push(Arc::new(LogSink));
    }

    for (index, webhook) in alert.webhooks.iter().enumerate() {
        let name = webhook
            .name
            .clone()
            .unwrap_or_else(|| format!("webhook-{}", index + 1));
        let sink = WebhookSink::new(name, &webhook.url, timeout)?
            .with_headers(webhook.headers.clone());
        sinks.push(Arc::new(sink));
    }

    if let Some(feishu) = &alert.feishu {
        let template = AlertTemplate::with_templates(
            feishu.template.as_deref(),
            feishu.recovery_template.as_deref(),
        )?;
        let sink = FeishuSink::new(&feishu.webhook_url, timeout)?
            .with_secret(feishu.secret.clone())
            .with_template(template);
        sinks.push(Arc::new(sink));
    }

    Ok(sinks)
}

/// 打开配置中的历史文件
pub async fn open_history(global: &GlobalConfig) -> Result<Option<Arc<dyn HistorySink>>> {
    match &global.history_path {
        Some(path) => {
            let history = JsonlHistory::open(path)
                .await
                .with_context(|| format!("打开历史文件失败: {path}"))?;
            Ok(Some(Arc::new(history)))
        }
        None => Ok(None),
    }
}

/// 根据全局配置构建告警分发器
pub async fn build_dispatcher(
    global: &GlobalConfig,
    history: Option<Arc<dyn HistorySink>>,
) -> Result<AlertDispatcher> {
    let sinks = build_sinks(&global.alert).context("创建告警渠道失败")?;
    if sinks.is_empty() {
        warn!("未配置任何告警渠道，状态迁移只会记录在历史中");
    }

    let dispatcher = AlertDispatcher::new(sinks, RetryPolicy::from(&global.alert));
    Ok(match history {
        Some(history) => dispatcher.with_history(history),
        None => dispatcher,
    })
}

/// 监控服务
pub struct MonitorService {
    config: Config,
    config_path: Option<PathBuf>,
    prober: Arc<dyn Prober>,
    coordinator: Arc<Coordinator>,
}

impl MonitorService {
    /// 根据配置组装所有组件
    pub async fn build(config: Config) -> Result<Self> {
        let prober: Arc<dyn Prober> =
            Arc::new(HttpProber::new().context("创建HTTP探测器失败")?);
        Self::build_with_prober(config, prober).await
    }

    /// 使用指定探测器组装组件
    pub async fn build_with_prober(config: Config, prober: Arc<dyn Prober>) -> Result<Self> {
        let registry = Arc::new(
            TargetRegistry::with_targets(config.resolved_targets())
                .await
                .context("注册监控目标失败")?,
        );
        let tracker = Arc::new(StateTracker::new());
        let history = open_history(&config.global).await?;
        let dispatcher = Arc::new(build_dispatcher(&config.global, history.clone()).await?);

        let coordinator = Coordinator::new(
            registry,
            Arc::clone(&prober),
            tracker,
            dispatcher,
            CoordinatorConfig::from(&config.global),
        );
        let coordinator = match history {
            Some(history) => coordinator.with_history(history),
            None => coordinator,
        };

        Ok(Self {
            config,
            config_path: None,
            prober,
            coordinator: Arc::new(coordinator),
        })
    }

    /// 设置配置文件路径，运行期间监控其变化
    pub fn with_config_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// 在前台运行直到收到 Ctrl+C
    pub async fn run(&self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let shutdown_tx_clone = shutdown_tx.clone();
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("收到中断信号，正在停止服务...");
                    let _ = shutdown_tx_clone.send(());
                }
                Err(err) => error!("监听中断信号失败: {}", err),
            }
        });

        self.run_until(shutdown_tx, shutdown_rx).await
    }

    /// 运行直到收到关闭通知
    pub async fn run_until(
        &self,
        shutdown_tx: broadcast::Sender<()>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let changes = self.coordinator.start().await;
        info!("监控已启动，目标数量: {}", changes.len());

        let _watcher = self.start_hot_reload(shutdown_tx.subscribe())?;
        let web_handle = self.start_web_server(shutdown_tx.subscribe());

        // 发送端全部关闭也视为关闭通知
        let _ = shutdown_rx.recv().await;

        self.coordinator.stop().await;
        if let Some(handle) = web_handle {
            if let Err(e) = handle.await {
                warn!("等待Web服务器退出失败: {}", e);
            }
        }

        info!("服务已停止");
        Ok(())
    }

    /// 启动配置热重载，新目标集合整体写入注册表
    fn start_hot_reload(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Option<ConfigWatcher>> {
        let Some(path) = &self.config_path else {
            return Ok(None);
        };

        let (mut watcher, mut changes) = ConfigWatcher::new(path, RELOAD_DEBOUNCE)?;
        watcher.start()?;

        let registry = Arc::clone(self.coordinator.registry());
        let current_global = self.config.global.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    change = changes.recv() => {
                        let change = match change {
                            Ok(change) => change,
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("配置变更事件积压，跳过 {} 个", n);
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };

                        if change.new_config.global != current_global {
                            warn!("全局配置变更需要重启服务才能生效，本次只更新目标列表");
                        }
                        match registry.replace_all(change.new_config.resolved_targets()).await {
                            Ok(diffs) => info!(
                                "配置热重载完成（版本 {}），目标变更数量: {}",
                                change.version,
                                diffs.len()
                            ),
                            Err(e) => error!("应用新目标列表失败，保留当前目标: {}", e),
                        }
                    }
                }
            }
        });

        Ok(Some(watcher))
    }

    /// 启动Web服务器（如果启用）
    fn start_web_server(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        let web_config = self.config.global.web.clone().filter(|web| web.enabled)?;
        let state = crate::web::AppState::new(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.prober),
        );

        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.recv().await;
            };
            if let Err(e) = crate::web::serve(&web_config, state, shutdown).await {
                error!("Web服务器运行失败: {}", e);
            }
        }))
    }
}
