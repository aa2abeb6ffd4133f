//! 目标注册表模块
//!
//! 保存被监控的端点及其检测配置。注册表采用写时复制：
//! 读取方拿到不可变快照的 `Arc`，写入方构建新表后整体替换，
//! 因此调度器在一次调度过程中永远不会看到部分写入。

use crate::error::RegistryError;
use crate::health::result::duration_ms;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

/// 支持的HTTP方法
pub const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

/// 被监控的目标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    /// 唯一ID
    pub id: String,
    /// 探测地址
    pub url: String,
    /// HTTP方法
    pub method: String,
    /// 请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 探测周期
    #[serde(with = "duration_ms")]
    pub interval: Duration,
    /// 单次探测截止时间
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    /// 连续失败多少次判定为不可用
    pub failure_threshold: u32,
    /// 连续成功多少次判定为恢复
    pub recovery_threshold: u32,
}

impl Target {
    /// 以默认参数创建目标：GET、60秒周期、10秒超时、阈值 3/2
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            failure_threshold: 3,
            recovery_threshold: 2,
        }
    }

    /// 设置探测周期
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 设置探测超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// 设置失败/恢复阈值
    pub fn with_thresholds(mut self, failure_threshold: u32, recovery_threshold: u32) -> Self {
        self.failure_threshold = failure_threshold;
        self.recovery_threshold = recovery_threshold;
        self
    }

    /// 设置HTTP方法
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_uppercase();
        self
    }

    /// 添加请求头
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// 校验目标配置
    pub fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::InvalidTarget {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("目标ID不能为空"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(invalid("URL必须以 http:// 或 https:// 开头"));
        }
        if !VALID_METHODS.contains(&self.method.as_str()) {
            return Err(invalid("HTTP方法无效"));
        }
        if self.interval.is_zero() {
            return Err(invalid("探测周期不能为0"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("探测超时不能为0"));
        }
        if self.failure_threshold == 0 {
            return Err(invalid("失败阈值不能为0"));
        }
        if self.recovery_threshold == 0 {
            return Err(invalid("恢复阈值不能为0"));
        }
        Ok(())
    }
}

/// 注册表整体替换产生的差异
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetDiff {
    /// 新增目标
    Added(String),
    /// 移除目标
    Removed(String),
    /// 修改目标
    Modified(String),
}

/// 目标快照
pub type TargetSnapshot = Arc<HashMap<String, Target>>;

/// 目标注册表
pub struct TargetRegistry {
    /// 当前快照
    targets: RwLock<TargetSnapshot>,
    /// 版本号通知
    version_tx: watch::Sender<u64>,
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TargetRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            targets: RwLock::new(Arc::new(HashMap::new())),
            version_tx,
        }
    }

    /// 以一组目标创建注册表
    pub async fn with_targets(targets: Vec<Target>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.replace_all(targets).await?;
        Ok(registry)
    }

    /// 获取一致性快照
    pub async fn snapshot(&self) -> TargetSnapshot {
        Arc::clone(&*self.targets.read().await)
    }

    /// 按ID排序列出所有目标
    pub async fn list(&self) -> Vec<Target> {
        let snapshot = self.snapshot().await;
        let mut targets: Vec<Target> = snapshot.values().cloned().collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        targets
    }

    /// 查询单个目标
    pub async fn get(&self, id: &str) -> Option<Target> {
        self.targets.read().await.get(id).cloned()
    }

    /// 目标数量
    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    /// 是否为空
    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }

    /// 注册新目标，ID已存在时返回 `DuplicateId`
    pub async fn register(&self, target: Target) -> Result<(), RegistryError> {
        target.validate()?;
        let mut guard = self.targets.write().await;
        if guard.contains_key(&target.id) {
            return Err(RegistryError::DuplicateId(target.id));
        }

        let mut next = HashMap::clone(&guard);
        info!("注册监控目标: {} ({})", target.id, target.url);
        next.insert(target.id.clone(), target);
        *guard = Arc::new(next);
        drop(guard);

        self.bump_version();
        Ok(())
    }

    /// 新增或原子替换目标
    ///
    /// 返回 `true` 表示替换了已有目标
    pub async fn upsert(&self, target: Target) -> Result<bool, RegistryError> {
        target.validate()?;
        let mut guard = self.targets.write().await;
        if guard.get(&target.id) == Some(&target) {
            debug!("目标配置未变化: {}", target.id);
            return Ok(true);
        }

        let mut next = HashMap::clone(&guard);
        let replaced = next.insert(target.id.clone(), target.clone()).is_some();
        *guard = Arc::new(next);
        drop(guard);

        if replaced {
            info!("更新监控目标: {} ({})", target.id, target.url);
        } else {
            info!("注册监控目标: {} ({})", target.id, target.url);
        }
        self.bump_version();
        Ok(replaced)
    }

    /// 移除目标，不存在时返回 `NotFound`
    pub async fn remove(&self, id: &str) -> Result<Target, RegistryError> {
        let mut guard = self.targets.write().await;
        if !guard.contains_key(id) {
            return Err(RegistryError::NotFound(id.to_string()));
        }

        let mut next = HashMap::clone(&guard);
        let removed = next
            .remove(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        *guard = Arc::new(next);
        drop(guard);

        info!("移除监控目标: {}", id);
        self.bump_version();
        Ok(removed)
    }

    /// 用一组新目标整体替换注册表（配置热重载使用）
    ///
    /// 全部校验通过后才会替换，返回新增、移除、修改的目标ID
    pub async fn replace_all(&self, targets: Vec<Target>) -> Result<Vec<TargetDiff>, RegistryError> {
        let mut next = HashMap::with_capacity(targets.len());
        for target in targets {
            target.validate()?;
            if next.contains_key(&target.id) {
                return Err(RegistryError::DuplicateId(target.id));
            }
            next.insert(target.id.clone(), target);
        }

        let mut guard = self.targets.write().await;
        let diffs = diff_targets(&guard, &next);
        if diffs.is_empty() {
            debug!("目标集合未变化");
            return Ok(diffs);
        }

        *guard = Arc::new(next);
        drop(guard);

        info!("目标集合已替换，变更数量: {}", diffs.len());
        self.bump_version();
        Ok(diffs)
    }

    /// 订阅注册表版本变化
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version_tx.subscribe()
    }

    /// 当前版本号
    pub fn version(&self) -> u64 {
        *self.version_tx.borrow()
    }

    fn bump_version(&self) {
        self.version_tx.send_modify(|version| *version += 1);
    }
}

/// 计算两组目标之间的差异
fn diff_targets(old: &HashMap<String, Target>, new: &HashMap<String, Target>) -> Vec<TargetDiff> {
    let mut diffs = Vec::new();

    for (id, target) in new {
        match old.get(id) {
            None => diffs.push(TargetDiff::Added(id.clone())),
            Some(previous) if previous != target => diffs.push(TargetDiff::Modified(id.clone())),
            Some(_) => {}
        }
    }
    for id in old.keys() {
        if !new.contains_key(id) {
            diffs.push(TargetDiff::Removed(id.clone()));
        }
    }

    diffs.sort_by(|a, b| diff_id(a).cmp(diff_id(b)));
    diffs
}

fn diff_id(diff: &TargetDiff) -> &str {
    match diff {
        TargetDiff::Added(id) | TargetDiff::Removed(id) | TargetDiff::Modified(id) => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> Target {
        Target::new(id, format!("https://{id}.example.com/health"))
    }

    #[tokio::test]
    async fn test_register_and_list_sorted() {
        let registry = TargetRegistry::new();
        registry.register(target("b")).await.unwrap();
        registry.register(target("a")).await.unwrap();

        let ids: Vec<String> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.version(), 2);
    }

    #[tokio::test]
    async fn test_register_duplicate_id() {
        let registry = TargetRegistry::new();
        registry.register(target("api")).await.unwrap();

        let err = registry.register(target("api")).await.unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("api".to_string()));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_remove_not_found() {
        let registry = TargetRegistry::new();
        let err = registry.remove("missing").await.unwrap_err();
        assert_eq!(err, RegistryError::NotFound("missing".to_string()));
        assert_eq!(registry.version(), 0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_atomically() {
        let registry = TargetRegistry::new();
        assert!(!registry.upsert(target("api")).await.unwrap());

        let before = registry.snapshot().await;
        let updated = target("api").with_interval(Duration::from_secs(5));
        assert!(registry.upsert(updated.clone()).await.unwrap());

        // 旧快照不受后续写入影响
        assert_eq!(before.get("api").unwrap().interval, Duration::from_secs(60));
        assert_eq!(registry.get("api").await, Some(updated));
    }

    #[tokio::test]
    async fn test_invalid_target_rejected() {
        let registry = TargetRegistry::new();
        let err = registry
            .register(target("api").with_thresholds(0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTarget { .. }));

        let err = registry
            .register(Target::new("ftp", "ftp://example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTarget { .. }));
    }

    #[tokio::test]
    async fn test_replace_all_reports_diff() {
        let registry = TargetRegistry::with_targets(vec![target("a"), target("b")])
            .await
            .unwrap();

        let diffs = registry
            .replace_all(vec![
                target("a"),
                target("b").with_thresholds(5, 5),
                target("c"),
            ])
            .await
            .unwrap();
        assert_eq!(
            diffs,
            vec![
                TargetDiff::Modified("b".to_string()),
                TargetDiff::Added("c".to_string()),
            ]
        );

        let diffs = registry.replace_all(vec![target("c")]).await.unwrap();
        assert_eq!(
            diffs,
            vec![
                TargetDiff::Removed("a".to_string()),
                TargetDiff::Removed("b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_replace_all_rejects_duplicates_without_partial_write() {
        let registry = TargetRegistry::with_targets(vec![target("a")]).await.unwrap();
        let err = registry
            .replace_all(vec![target("x"), target("x")])
            .await
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateId("x".to_string()));

        let ids: Vec<String> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_subscribe_sees_version_bumps() {
        let registry = TargetRegistry::new();
        let mut rx = registry.subscribe();
        registry.register(target("a")).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
    }
}
