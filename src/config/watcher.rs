//! 配置文件监控模块
//!
//! 监控配置文件变化，防抖后重新加载并广播新配置

use crate::config::loader::{ConfigLoader, TomlConfigLoader};
use crate::config::types::Config;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 配置变更事件
#[derive(Debug, Clone)]
pub struct ConfigChangeEvent {
    /// 配置文件路径
    pub config_path: PathBuf,
    /// 新配置
    pub new_config: Config,
    /// 变更时间
    pub timestamp: Instant,
    /// 配置版本号
    pub version: u64,
}

/// 配置文件监控器
pub struct ConfigWatcher {
    /// 配置文件路径
    config_path: PathBuf,
    /// 文件系统监控器
    watcher: Option<RecommendedWatcher>,
    /// 事件处理任务
    task: Option<JoinHandle<()>>,
    /// 配置加载器
    loader: TomlConfigLoader,
    /// 事件发送器
    event_sender: broadcast::Sender<ConfigChangeEvent>,
    /// 防抖动延迟
    debounce_delay: Duration,
}

impl ConfigWatcher {
    /// 创建新的配置监控器
    ///
    /// # 参数
    /// * `config_path` - 配置文件路径
    /// * `debounce_delay` - 防抖动延迟时间
    ///
    /// # 返回
    /// * `Result<(Self, broadcast::Receiver<ConfigChangeEvent>)>` - 监控器和事件接收器
    pub fn new<P: AsRef<Path>>(
        config_path: P,
        debounce_delay: Duration,
    ) -> Result<(Self, broadcast::Receiver<ConfigChangeEvent>)> {
        let config_path = config_path.as_ref().to_path_buf();
        Self::validate_config_path(&config_path)?;

        let (event_sender, event_receiver) = broadcast::channel(16);
        let watcher = Self {
            config_path,
            watcher: None,
            task: None,
            loader: TomlConfigLoader::default(),
            event_sender,
            debounce_delay,
        };

        Ok((watcher, event_receiver))
    }

    /// 验证配置文件路径
    fn validate_config_path(path: &Path) -> Result<()> {
        if !path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", path.display()));
        }
        if !path.is_file() {
            return Err(anyhow::anyhow!("路径不是文件: {}", path.display()));
        }
        if path.extension().is_some_and(|ext| ext != "toml") {
            warn!("配置文件扩展名不是.toml: {}", path.display());
        }
        Ok(())
    }

    /// 启动配置文件监控
    pub fn start(&mut self) -> Result<()> {
        info!("启动配置文件监控: {}", self.config_path.display());

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // 接收端关闭说明监控已停止
                let _ = tx.send(res);
            },
            notify::Config::default().with_poll_interval(Duration::from_secs(1)),
        )
        .context("创建文件监控器失败")?;

        // 监控配置文件所在目录，编辑器保存时常会替换文件
        let watch_path = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .with_context(|| format!("监控目录失败: {}", watch_path.display()))?;
        self.watcher = Some(watcher);

        self.task = Some(tokio::spawn(handle_file_events(
            rx,
            self.config_path.clone(),
            self.event_sender.clone(),
            self.loader.clone(),
            self.debounce_delay,
        )));

        info!("配置文件监控已启动");
        Ok(())
    }

    /// 停止监控
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.watcher.take().is_some() {
            info!("配置文件监控已停止");
        }
    }

    /// 订阅配置变更事件
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.event_sender.subscribe()
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 处理文件系统事件
async fn handle_file_events(
    mut rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    config_path: PathBuf,
    event_sender: broadcast::Sender<ConfigChangeEvent>,
    loader: TomlConfigLoader,
    debounce_delay: Duration,
) {
    let mut version = 1u64;

    while let Some(res) = rx.recv().await {
        match res {
            Ok(event) if is_target_file_event(&event, &config_path) => {
                debug!("检测到配置文件变更事件: {:?}", event.kind);

                // 等待写入完成，并合并防抖窗口内的后续事件
                tokio::time::sleep(debounce_delay).await;
                while rx.try_recv().is_ok() {}

                match loader.load_from_file(&config_path).await {
                    Ok(new_config) => {
                        info!("配置重载成功，版本: {}", version);
                        let change = ConfigChangeEvent {
                            config_path: config_path.clone(),
                            new_config,
                            timestamp: Instant::now(),
                            version,
                        };
                        version += 1;
                        if event_sender.send(change).is_err() {
                            debug!("没有配置变更订阅者");
                        }
                    }
                    Err(e) => error!("配置重载失败，继续使用当前配置: {}", e),
                }
            }
            Ok(_) => {}
            Err(e) => error!("文件监控事件错误: {}", e),
        }
    }
}

/// 检查是否是目标文件的事件
fn is_target_file_event(event: &Event, target_path: &Path) -> bool {
    match &event.kind {
        EventKind::Modify(_) | EventKind::Create(_) => event
            .paths
            .iter()
            .any(|path| path == target_path || path.file_name() == target_path.file_name()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::DEFAULT_CONFIG_TEMPLATE;
    use notify::event::{CreateKind, ModifyKind};
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[test]
    fn test_config_file_validation() {
        assert!(ConfigWatcher::validate_config_path(Path::new("/nonexistent/file.toml")).is_err());

        let temp_dir = TempDir::new().unwrap();
        assert!(ConfigWatcher::validate_config_path(temp_dir.path()).is_err());

        let path = temp_dir.path().join("config.toml");
        fs::write(&path, DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert!(ConfigWatcher::validate_config_path(&path).is_ok());
    }

    #[test]
    fn test_is_target_file_event() {
        let target = PathBuf::from("/etc/uptime/config.toml");
        let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(target.clone());
        assert!(is_target_file_event(&event, &target));

        let other = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/etc/uptime/other.toml"));
        assert!(!is_target_file_event(&other, &target));

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(target.clone());
        assert!(!is_target_file_event(&removed, &target));
    }

    #[tokio::test]
    async fn test_reload_on_change() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, DEFAULT_CONFIG_TEMPLATE).unwrap();

        let (mut watcher, mut rx) = ConfigWatcher::new(&path, Duration::from_millis(100)).unwrap();
        watcher.start().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let updated = DEFAULT_CONFIG_TEMPLATE.replace("interval_seconds = 600", "interval_seconds = 30");
        fs::write(&path, updated).unwrap();

        let change = timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("等待配置变更超时")
            .unwrap();
        assert_eq!(change.version, 1);
        assert_eq!(change.new_config.targets[0].interval_seconds, Some(30));

        watcher.stop();
    }
}
