//! 探测调度协调器
//!
//! 每个目标一个定时任务，到期时在独立任务中执行探测。协调器负责：
//! - 同一目标同一时刻最多一个探测在执行，上一次未完成时跳过本次
//! - 通过全局信号量限制并发探测数量
//! - 按探测开始顺序把结果交给状态跟踪器，产生的事件转交告警分发器
//! - 监听注册表版本变化，增量增删改定时任务

use crate::config::GlobalConfig;
use crate::error::TrackerError;
use crate::health::checker::Prober;
use crate::health::result::ProbeResult;
use crate::health::tracker::StateTracker;
use crate::history::{HistoryRecord, HistorySink};
use crate::logging::{probe_log, transition_log};
use crate::notification::{AlertDispatcher, DispatchStats};
use crate::registry::{Target, TargetDiff, TargetRegistry};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// 协调器配置
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// 全局最大并发探测数
    pub max_concurrent_probes: usize,
    /// 定时任务首次探测前的最大随机延迟
    pub max_start_jitter: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_probes: 50,
            max_start_jitter: Duration::from_millis(1000),
        }
    }
}

impl From<&GlobalConfig> for CoordinatorConfig {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            max_concurrent_probes: config.max_concurrent_probes,
            max_start_jitter: Duration::from_millis(config.max_start_jitter_ms),
        }
    }
}

/// 协调器状态快照
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    /// 是否运行中
    pub running: bool,
    /// 已调度的目标数量
    pub scheduled_targets: usize,
    /// 当前正在执行的探测数
    pub in_flight: usize,
    /// 历史最大并发探测数
    pub max_in_flight: usize,
    /// 全局并发上限
    pub max_concurrent_probes: usize,
    /// 已开始的探测数
    pub probes_started: u64,
    /// 已完成的探测数
    pub probes_completed: u64,
    /// 因目标已移除而丢弃的结果数
    pub results_discarded: u64,
    /// 因上一次探测未完成而跳过的调度次数
    pub ticks_skipped: u64,
    /// 产生的状态迁移事件数
    pub alerts_raised: u64,
    /// 告警分发统计
    pub dispatch: DispatchStats,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    probes_started: AtomicU64,
    probes_completed: AtomicU64,
    results_discarded: AtomicU64,
    ticks_skipped: AtomicU64,
    alerts_raised: AtomicU64,
}

impl Counters {
    fn enter_probe(&self) -> ProbeSlot<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.probes_started.fetch_add(1, Ordering::Relaxed);
        ProbeSlot(self)
    }
}

/// 全局在途计数占位，释放时计数减一
struct ProbeSlot<'a>(&'a Counters);

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.probes_completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 单目标在途标记，释放时清除
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// 定时任务与探测任务共享的依赖
#[derive(Clone)]
struct ProbeContext {
    prober: Arc<dyn Prober>,
    tracker: Arc<StateTracker>,
    dispatcher: Arc<AlertDispatcher>,
    history: Option<Arc<dyn HistorySink>>,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

/// 已调度的目标
struct ScheduledTarget {
    target: Target,
    epoch: u64,
    in_flight: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// 探测调度协调器
pub struct Coordinator {
    registry: Arc<TargetRegistry>,
    prober: Arc<dyn Prober>,
    tracker: Arc<StateTracker>,
    dispatcher: Arc<AlertDispatcher>,
    history: Option<Arc<dyn HistorySink>>,
    config: CoordinatorConfig,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
    scheduled: Mutex<HashMap<String, ScheduledTarget>>,
    /// 已移除但探测可能仍在执行的目标的在途标记
    retiring: Mutex<HashMap<String, Arc<AtomicBool>>>,
    control: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Coordinator {
    /// 创建新的协调器
    ///
    /// # 参数
    /// * `registry` - 目标注册表
    /// * `prober` - 探测器
    /// * `tracker` - 状态跟踪器
    /// * `dispatcher` - 告警分发器
    /// * `config` - 协调器配置
    pub fn new(
        registry: Arc<TargetRegistry>,
        prober: Arc<dyn Prober>,
        tracker: Arc<StateTracker>,
        dispatcher: Arc<AlertDispatcher>,
        config: CoordinatorConfig,
    ) -> Self {
        let permits = config.max_concurrent_probes.max(1);
        Self {
            registry,
            prober,
            tracker,
            dispatcher,
            history: None,
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
            counters: Arc::new(Counters::default()),
            scheduled: Mutex::new(HashMap::new()),
            retiring: Mutex::new(HashMap::new()),
            control: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// 设置历史存储
    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<StateTracker> {
        &self.tracker
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    /// 是否运行中
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 启动协调器
    ///
    /// 按注册表当前内容建立定时任务，并启动控制循环跟随注册表变化。
    /// 重复调用不会产生效果。
    ///
    /// # 返回
    /// * `Vec<TargetDiff>` - 首次对齐产生的变更
    pub async fn start(self: &Arc<Self>) -> Vec<TargetDiff> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("协调器已在运行");
            return Vec::new();
        }

        // 先订阅再对齐，避免漏掉对齐期间的变更
        let mut version_rx = self.registry.subscribe();
        version_rx.borrow_and_update();
        let changes = self.reconcile().await;

        let coordinator: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while version_rx.changed().await.is_ok() {
                let Some(coordinator) = coordinator.upgrade() else {
                    break;
                };
                let version = *version_rx.borrow_and_update();
                let changes = coordinator.reconcile().await;
                debug!("注册表版本 {} 对齐完成，变更数量: {}", version, changes.len());
            }
        });
        *self.control.lock().await = Some(handle);

        info!(
            "协调器已启动，目标数量: {}，最大并发探测: {}",
            self.scheduled.lock().await.len(),
            self.config.max_concurrent_probes
        );
        changes
    }

    /// 停止协调器
    ///
    /// 取消控制循环和所有定时任务，已在执行的探测会自然结束
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.control.lock().await.take() {
            handle.abort();
        }

        let mut scheduled = self.scheduled.lock().await;
        let mut retiring = self.retiring.lock().await;
        for (id, entry) in scheduled.drain() {
            entry.handle.abort();
            debug!("停止目标定时任务: {}", id);
            retiring.insert(id, entry.in_flight);
        }
        info!("协调器已停止");
    }

    /// 使定时任务与注册表快照对齐
    ///
    /// 新目标建立状态并启动定时任务；修改的目标以新配置重启定时任务，
    /// 保留状态和在途标记；移除的目标立即停止调度并删除状态，
    /// 其在途探测的结果会被丢弃。
    ///
    /// 移除后重新加入的同ID目标沿用旧的在途标记，旧探测结束前不会开始新探测。
    pub async fn reconcile(&self) -> Vec<TargetDiff> {
        // 持有调度表锁后再读快照，并发对齐时后完成者总是使用最新快照
        let mut scheduled = self.scheduled.lock().await;
        let snapshot = self.registry.snapshot().await;
        let mut retiring = self.retiring.lock().await;
        retiring.retain(|_, flag| flag.load(Ordering::Acquire));
        let mut changes = Vec::new();

        let removed: Vec<String> = scheduled
            .keys()
            .filter(|id| !snapshot.contains_key(*id))
            .cloned()
            .collect();
        for id in removed {
            if let Some(entry) = scheduled.remove(&id) {
                entry.handle.abort();
                retiring.insert(id.clone(), entry.in_flight);
            }
            self.tracker.remove(&id).await;
            info!("停止调度目标: {}", id);
            changes.push(TargetDiff::Removed(id));
        }

        for (id, target) in snapshot.iter() {
            match scheduled.get_mut(id) {
                Some(entry) if entry.target == *target => {}
                Some(entry) => {
                    entry.handle.abort();
                    entry.target = target.clone();
                    entry.handle = self.spawn_timer(
                        target.clone(),
                        entry.epoch,
                        Arc::clone(&entry.in_flight),
                        self.start_jitter(target.interval),
                    );
                    info!("目标配置已更新，重新调度: {}", id);
                    changes.push(TargetDiff::Modified(id.clone()));
                }
                None => {
                    let epoch = self.tracker.register(id).await;
                    let in_flight = retiring
                        .remove(id)
                        .unwrap_or_else(|| Arc::new(AtomicBool::new(false)));
                    let handle = self.spawn_timer(
                        target.clone(),
                        epoch,
                        Arc::clone(&in_flight),
                        self.start_jitter(target.interval),
                    );
                    scheduled.insert(
                        id.clone(),
                        ScheduledTarget {
                            target: target.clone(),
                            epoch,
                            in_flight,
                            handle,
                        },
                    );
                    info!(
                        "开始调度目标: {} (间隔 {:?}，超时 {:?})",
                        id, target.interval, target.timeout
                    );
                    changes.push(TargetDiff::Added(id.clone()));
                }
            }
        }

        changes
    }

    /// 已调度的目标ID（排序）
    pub async fn scheduled_targets(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.scheduled.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 获取协调器状态
    pub async fn status(&self) -> CoordinatorStatus {
        let counters = &self.counters;
        CoordinatorStatus {
            running: self.is_running(),
            scheduled_targets: self.scheduled.lock().await.len(),
            in_flight: counters.in_flight.load(Ordering::SeqCst),
            max_in_flight: counters.max_in_flight.load(Ordering::SeqCst),
            max_concurrent_probes: self.config.max_concurrent_probes.max(1),
            probes_started: counters.probes_started.load(Ordering::Relaxed),
            probes_completed: counters.probes_completed.load(Ordering::Relaxed),
            results_discarded: counters.results_discarded.load(Ordering::Relaxed),
            ticks_skipped: counters.ticks_skipped.load(Ordering::Relaxed),
            alerts_raised: counters.alerts_raised.load(Ordering::Relaxed),
            dispatch: self.dispatcher.stats().await,
        }
    }

    /// 首次探测的随机延迟，取值 `[0, min(interval, max_start_jitter))`
    fn start_jitter(&self, interval: Duration) -> Duration {
        let max_ms = self.config.max_start_jitter.min(interval).as_millis() as u64;
        if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
        }
    }

    fn context(&self) -> ProbeContext {
        ProbeContext {
            prober: Arc::clone(&self.prober),
            tracker: Arc::clone(&self.tracker),
            dispatcher: Arc::clone(&self.dispatcher),
            history: self.history.clone(),
            semaphore: Arc::clone(&self.semaphore),
            counters: Arc::clone(&self.counters),
        }
    }

    fn spawn_timer(
        &self,
        target: Target,
        epoch: u64,
        in_flight: Arc<AtomicBool>,
        jitter: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(run_timer(self.context(), target, epoch, in_flight, jitter))
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.control.get_mut().take() {
            handle.abort();
        }
        for entry in self.scheduled.get_mut().values() {
            entry.handle.abort();
        }
    }
}

/// 单目标定时循环
async fn run_timer(
    ctx: ProbeContext,
    target: Target,
    epoch: u64,
    in_flight: Arc<AtomicBool>,
    jitter: Duration,
) {
    if !jitter.is_zero() {
        sleep(jitter).await;
    }

    let target = Arc::new(target);
    let mut ticker = interval(target.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        if in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            ctx.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
            debug!("上一次探测尚未完成，跳过本次调度: {}", target.id);
            continue;
        }

        let guard = InFlightGuard(Arc::clone(&in_flight));
        tokio::spawn(run_probe(ctx.clone(), Arc::clone(&target), epoch, guard));
    }
}

/// 执行一次探测并处理结果
///
/// 在途标记在结果交给跟踪器之后才释放，保证同一目标的结果按开始顺序处理
async fn run_probe(ctx: ProbeContext, target: Arc<Target>, epoch: u64, _guard: InFlightGuard) {
    let permit = match Arc::clone(&ctx.semaphore).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            warn!("并发信号量已关闭，放弃探测: {}", target.id);
            return;
        }
    };

    let result = {
        let _slot = ctx.counters.enter_probe();
        ctx.prober.probe(&target, target.timeout).await
    };
    drop(permit);

    probe_log(&result);
    ctx.handle_result(&target, epoch, result).await;
}

impl ProbeContext {
    async fn handle_result(&self, target: &Target, epoch: u64, result: ProbeResult) {
        let record = self
            .history
            .as_ref()
            .map(|_| HistoryRecord::ProbeResult(result.clone()));

        match self.tracker.apply(target, epoch, result).await {
            Ok(event) => {
                if let Some(record) = record {
                    self.append_history(record).await;
                }
                if let Some(event) = event {
                    self.counters.alerts_raised.fetch_add(1, Ordering::Relaxed);
                    transition_log(&event);
                    self.append_history(HistoryRecord::Alert(event.clone())).await;
                    self.dispatcher.submit(event);
                }
            }
            Err(TrackerError::NotFound(id)) => {
                self.counters.results_discarded.fetch_add(1, Ordering::Relaxed);
                debug!("目标已移除，丢弃探测结果: {}", id);
            }
        }
    }

    async fn append_history(&self, record: HistoryRecord) {
        if let Some(history) = &self.history {
            if let Err(e) = history.append(&record).await {
                warn!("写入历史记录失败: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::result::ProbeOutcome;
    use crate::notification::{NoOpSink, RetryPolicy};
    use async_trait::async_trait;

    struct AlwaysUp;

    #[async_trait]
    impl Prober for AlwaysUp {
        async fn probe(&self, target: &Target, _deadline: Duration) -> ProbeResult {
            ProbeResult::new(target.id.clone(), ProbeOutcome::Up).with_status_code(200)
        }
    }

    fn coordinator(registry: Arc<TargetRegistry>) -> Arc<Coordinator> {
        let dispatcher = Arc::new(AlertDispatcher::new(
            vec![Arc::new(NoOpSink)],
            RetryPolicy::default(),
        ));
        Arc::new(Coordinator::new(
            registry,
            Arc::new(AlwaysUp),
            Arc::new(StateTracker::new()),
            dispatcher,
            CoordinatorConfig {
                max_concurrent_probes: 4,
                max_start_jitter: Duration::ZERO,
            },
        ))
    }

    fn target(id: &str) -> Target {
        Target::new(id, "http://127.0.0.1:1").with_interval(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_reconcile_add_modify_remove() {
        let registry = Arc::new(TargetRegistry::new());
        registry.register(target("a")).await.unwrap();
        registry.register(target("b")).await.unwrap();
        let coordinator = coordinator(Arc::clone(&registry));

        let mut changes = coordinator.reconcile().await;
        changes.sort_by_key(|c| format!("{c:?}"));
        assert_eq!(
            changes,
            vec![
                TargetDiff::Added("a".to_string()),
                TargetDiff::Added("b".to_string())
            ]
        );
        let epoch_a = coordinator.tracker().register("a").await;

        registry
            .upsert(target("a").with_thresholds(5, 5))
            .await
            .unwrap();
        registry.remove("b").await.unwrap();
        let mut changes = coordinator.reconcile().await;
        changes.sort_by_key(|c| format!("{c:?}"));
        assert_eq!(
            changes,
            vec![
                TargetDiff::Modified("a".to_string()),
                TargetDiff::Removed("b".to_string())
            ]
        );

        // 修改目标保留状态纪元，移除目标删除状态
        assert_eq!(coordinator.tracker().register("a").await, epoch_a);
        assert!(coordinator.tracker().get("b").await.is_none());
        assert_eq!(coordinator.scheduled_targets().await, vec!["a"]);

        assert!(coordinator.reconcile().await.is_empty());
    }

    #[tokio::test]
    async fn test_start_probes_immediately_and_stop() {
        let registry = Arc::new(TargetRegistry::new());
        registry
            .register(target("a").with_thresholds(1, 1))
            .await
            .unwrap();
        let coordinator = coordinator(Arc::clone(&registry));

        coordinator.start().await;
        assert!(coordinator.is_running());
        assert!(coordinator.start().await.is_empty());

        for _ in 0..100 {
            if coordinator.status().await.alerts_raised == 1 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        let status = coordinator.status().await;
        assert_eq!(status.alerts_raised, 1);
        assert_eq!(status.scheduled_targets, 1);

        coordinator.stop().await;
        let status = coordinator.status().await;
        assert!(!status.running);
        assert_eq!(status.scheduled_targets, 0);
    }

    #[tokio::test]
    async fn test_control_loop_follows_registry() {
        let registry = Arc::new(TargetRegistry::new());
        let coordinator = coordinator(Arc::clone(&registry));
        coordinator.start().await;

        registry.register(target("late")).await.unwrap();
        for _ in 0..100 {
            if !coordinator.scheduled_targets().await.is_empty() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(coordinator.scheduled_targets().await, vec!["late"]);
        coordinator.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconcile_ends_on_latest_snapshot() {
        let registry = Arc::new(TargetRegistry::new());
        registry.register(target("a")).await.unwrap();
        let coordinator = coordinator(Arc::clone(&registry));

        for _ in 0..20 {
            registry.register(target("b")).await.unwrap();
            let first = tokio::spawn({
                let coordinator = Arc::clone(&coordinator);
                async move { coordinator.reconcile().await }
            });
            registry.remove("b").await.unwrap();
            let second = tokio::spawn({
                let coordinator = Arc::clone(&coordinator);
                async move { coordinator.reconcile().await }
            });
            first.await.unwrap();
            second.await.unwrap();

            assert_eq!(coordinator.scheduled_targets().await, vec!["a"]);
            assert!(coordinator.tracker().get("b").await.is_none());
        }
    }

    #[tokio::test]
    async fn test_modified_target_restarts_with_jitter() {
        let registry = Arc::new(TargetRegistry::new());
        registry.register(target("a")).await.unwrap();
        let coordinator = Arc::new(Coordinator::new(
            Arc::clone(&registry),
            Arc::new(AlwaysUp),
            Arc::new(StateTracker::new()),
            Arc::new(AlertDispatcher::new(Vec::new(), RetryPolicy::default())),
            CoordinatorConfig {
                max_concurrent_probes: 4,
                max_start_jitter: Duration::from_secs(3600),
            },
        ));

        coordinator.reconcile().await;
        registry
            .upsert(target("a").with_thresholds(5, 5))
            .await
            .unwrap();
        assert_eq!(
            coordinator.reconcile().await,
            vec![TargetDiff::Modified("a".to_string())]
        );

        sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.status().await.probes_started, 0);
    }

    #[test]
    fn test_start_jitter_bounded_by_interval() {
        let coordinator = Coordinator::new(
            Arc::new(TargetRegistry::new()),
            Arc::new(AlwaysUp),
            Arc::new(StateTracker::new()),
            Arc::new(AlertDispatcher::new(Vec::new(), RetryPolicy::default())),
            CoordinatorConfig {
                max_concurrent_probes: 1,
                max_start_jitter: Duration::from_secs(10),
            },
        );
        for _ in 0..100 {
            assert!(coordinator.start_jitter(Duration::from_millis(20)) < Duration::from_millis(20));
        }
        assert_eq!(coordinator.start_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_config_from_global() {
        let global = GlobalConfig {
            max_concurrent_probes: 7,
            max_start_jitter_ms: 250,
            ..GlobalConfig::default()
        };
        let config = CoordinatorConfig::from(&global);
        assert_eq!(config.max_concurrent_probes, 7);
        assert_eq!(config.max_start_jitter, Duration::from_millis(250));
    }
}
