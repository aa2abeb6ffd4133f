//! 目标状态跟踪器
//!
//! 每个目标维护一个可用性状态机，通过连续失败/连续成功阈值进行抖动抑制。
//! 状态只能由 [`transition`] 修改。

use crate::error::TrackerError;
use crate::health::result::{AlertEvent, ProbeResult, TargetStatus};
use crate::registry::Target;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

/// 单个目标的可用性状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    /// 目标ID
    pub target_id: String,
    /// 当前状态
    pub current_status: TargetStatus,
    /// 连续失败次数
    pub consecutive_failures: u32,
    /// 连续成功次数
    pub consecutive_successes: u32,
    /// 上次状态迁移时间
    pub last_transition_at: Option<DateTime<Utc>>,
    /// 最近一次探测结果
    pub last_result: Option<ProbeResult>,
}

impl TargetState {
    /// 创建初始状态（Unknown）
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            current_status: TargetStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition_at: None,
            last_result: None,
        }
    }
}

/// 状态迁移函数
///
/// 成功结果累加连续成功并清零连续失败，失败（Down/Error）反之。
/// 仅当计数达到对应阈值且当前状态不同时才迁移并产生告警事件，
/// 阈值以下的交替结果只更新计数。
pub fn transition(
    state: &mut TargetState,
    failure_threshold: u32,
    recovery_threshold: u32,
    result: ProbeResult,
) -> Option<AlertEvent> {
    let next_status = if result.outcome.is_healthy() {
        state.consecutive_successes = state.consecutive_successes.saturating_add(1);
        state.consecutive_failures = 0;
        (state.current_status != TargetStatus::Up
            && state.consecutive_successes >= recovery_threshold)
            .then_some(TargetStatus::Up)
    } else {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_successes = 0;
        (state.current_status != TargetStatus::Down
            && state.consecutive_failures >= failure_threshold)
            .then_some(TargetStatus::Down)
    };

    let event = next_status.map(|to_status| {
        let occurred_at = result.timestamp;
        let event = AlertEvent {
            target_id: state.target_id.clone(),
            from_status: state.current_status,
            to_status,
            occurred_at,
            result: result.clone(),
        };
        state.current_status = to_status;
        state.last_transition_at = Some(occurred_at);
        event
    });

    state.last_result = Some(result);
    event
}

/// 跟踪表中的条目
#[derive(Debug)]
struct TrackedEntry {
    /// 注册纪元，目标被移除后重新注册会得到新的纪元
    epoch: u64,
    state: TargetState,
}

/// 状态跟踪器，独占所有目标的状态
#[derive(Debug, Default)]
pub struct StateTracker {
    entries: Mutex<HashMap<String, TrackedEntry>>,
    next_epoch: AtomicU64,
}

impl StateTracker {
    /// 创建新的状态跟踪器
    pub fn new() -> Self {
        Self::default()
    }

    /// 为目标建立状态条目，已存在时保留原状态并返回原纪元
    pub async fn register(&self, target_id: &str) -> u64 {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get(target_id) {
            return entry.epoch;
        }

        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        entries.insert(
            target_id.to_string(),
            TrackedEntry {
                epoch,
                state: TargetState::new(target_id),
            },
        );
        debug!("建立目标状态: {} (epoch={})", target_id, epoch);
        epoch
    }

    /// 删除目标状态
    pub async fn remove(&self, target_id: &str) -> Option<TargetState> {
        self.entries
            .lock()
            .await
            .remove(target_id)
            .map(|entry| entry.state)
    }

    /// 应用一次探测结果
    ///
    /// 目标已被移除或纪元不匹配时返回 `NotFound`，调用方应丢弃该结果
    pub async fn apply(
        &self,
        target: &Target,
        epoch: u64,
        result: ProbeResult,
    ) -> Result<Option<AlertEvent>, TrackerError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(&target.id)
            .filter(|entry| entry.epoch == epoch)
            .ok_or_else(|| TrackerError::NotFound(target.id.clone()))?;

        Ok(transition(
            &mut entry.state,
            target.failure_threshold,
            target.recovery_threshold,
            result,
        ))
    }

    /// 查询单个目标状态
    pub async fn get(&self, target_id: &str) -> Option<TargetState> {
        self.entries
            .lock()
            .await
            .get(target_id)
            .map(|entry| entry.state.clone())
    }

    /// 所有目标状态快照（按ID排序）
    pub async fn snapshot(&self) -> Vec<TargetState> {
        let entries = self.entries.lock().await;
        let mut states: Vec<TargetState> =
            entries.values().map(|entry| entry.state.clone()).collect();
        states.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        states
    }

    /// 已跟踪的目标数量
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// 是否没有跟踪任何目标
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
