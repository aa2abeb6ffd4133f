//! Web 路由处理函数

use super::{ApiResponse, AppState};
use crate::health::{CoordinatorStatus, ProbeResult, TargetState, TargetStatus};
use crate::registry::Target;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;

/// 目标及其当前状态
#[derive(Debug, Serialize)]
pub struct TargetView {
    /// 目标配置
    #[serde(flatten)]
    pub target: Target,
    /// 当前状态（尚未建立时为空）
    pub state: Option<TargetState>,
}

/// 服务整体状态
#[derive(Debug, Serialize)]
pub struct StatusView {
    pub name: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub total_targets: usize,
    pub up: usize,
    pub down: usize,
    pub unknown: usize,
    pub coordinator: CoordinatorStatus,
}

/// 根路径
pub async fn index() -> &'static str {
    "Uptime Monitor is running. See /api/status and /api/targets."
}

/// 整体状态
pub async fn status(State(state): State<AppState>) -> Json<ApiResponse<StatusView>> {
    let states = state.tracker.snapshot().await;
    let count = |status: TargetStatus| states.iter().filter(|s| s.current_status == status).count();

    let view = StatusView {
        name: crate::APP_NAME,
        version: crate::VERSION,
        uptime_seconds: (chrono::Utc::now() - state.start_time).num_seconds(),
        total_targets: state.registry.len().await,
        up: count(TargetStatus::Up),
        down: count(TargetStatus::Down),
        unknown: count(TargetStatus::Unknown),
        coordinator: state.coordinator.status().await,
    };
    Json(ApiResponse::success(view))
}

/// 所有目标及状态
pub async fn targets(State(state): State<AppState>) -> Json<ApiResponse<Vec<TargetView>>> {
    let mut views = Vec::new();
    for target in state.registry.list().await {
        let target_state = state.tracker.get(&target.id).await;
        views.push(TargetView {
            target,
            state: target_state,
        });
    }
    Json(ApiResponse::success(views))
}

/// 对单个目标执行一次探测，不经过状态机
pub async fn check_target(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Some(target) = state.registry.get(&id).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<ProbeResult>::error(format!("目标不存在: {id}"))),
        );
    };

    let result = state.prober.probe(&target, target.timeout).await;
    (StatusCode::OK, Json(ApiResponse::success(result)))
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::*;
    use crate::health::{Coordinator, CoordinatorConfig, ProbeOutcome, Prober, StateTracker};
    use crate::notification::{AlertDispatcher, NoOpSink, RetryPolicy};
    use crate::registry::TargetRegistry;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FixedProber;

    #[async_trait]
    impl Prober for FixedProber {
        async fn probe(&self, target: &Target, _deadline: Duration) -> ProbeResult {
            ProbeResult::new(target.id.clone(), ProbeOutcome::Down).with_status_code(503)
        }
    }

    async fn app_state() -> AppState {
        let registry = Arc::new(
            TargetRegistry::with_targets(vec![Target::new("api", "https://example.com")])
                .await
                .unwrap(),
        );
        let tracker = Arc::new(StateTracker::new());
        tracker.register("api").await;
        let prober: Arc<dyn Prober> = Arc::new(FixedProber);
        let dispatcher = Arc::new(AlertDispatcher::new(
            vec![Arc::new(NoOpSink)],
            RetryPolicy::default(),
        ));
        let coordinator = Arc::new(Coordinator::new(
            registry,
            Arc::clone(&prober),
            tracker,
            dispatcher,
            CoordinatorConfig::default(),
        ));
        AppState::new(coordinator, prober)
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = router(app_state().await)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_index() {
        let response = router(app_state().await)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("Uptime Monitor"));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let (status, body) = get_json("/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["total_targets"], 1);
        assert_eq!(body["data"]["unknown"], 1);
        assert_eq!(body["data"]["coordinator"]["running"], false);
    }

    #[tokio::test]
    async fn test_targets_endpoint() {
        let (status, body) = get_json("/api/targets").await;
        assert_eq!(status, StatusCode::OK);
        let targets = body["data"].as_array().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0]["id"], "api");
        assert_eq!(targets[0]["state"]["current_status"], "unknown");
    }

    #[tokio::test]
    async fn test_check_endpoint_does_not_touch_state() {
        let state = app_state().await;
        let tracker = Arc::clone(&state.tracker);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/targets/api/check")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["outcome"], "down");
        assert_eq!(body["data"]["status_code"], 503);

        let target_state = tracker.get("api").await.unwrap();
        assert_eq!(target_state.consecutive_failures, 0);
        assert!(target_state.last_result.is_none());
    }

    #[tokio::test]
    async fn test_check_unknown_target() {
        let (status, body) = get_json("/api/targets/missing/check").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }
}
