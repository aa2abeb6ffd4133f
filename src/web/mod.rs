//! Web API模块
//!
//! 提供只读状态查询和单次探测的HTTP接口

use crate::config::WebConfig;
use crate::health::{Coordinator, Prober, StateTracker};
use crate::registry::TargetRegistry;
use axum::{routing::get, Router};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod handlers;

/// 处理函数共享的应用状态
#[derive(Clone)]
pub struct AppState {
    /// 目标注册表
    pub registry: Arc<TargetRegistry>,
    /// 状态跟踪器
    pub tracker: Arc<StateTracker>,
    /// 探测器（单次探测使用）
    pub prober: Arc<dyn Prober>,
    /// 调度协调器
    pub coordinator: Arc<Coordinator>,
    /// 启动时间
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// 从协调器构建应用状态
    pub fn new(coordinator: Arc<Coordinator>, prober: Arc<dyn Prober>) -> Self {
        Self {
            registry: Arc::clone(coordinator.registry()),
            tracker: Arc::clone(coordinator.tracker()),
            prober,
            coordinator,
            start_time: chrono::Utc::now(),
        }
    }
}

/// API响应包装器
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    /// 是否成功
    pub success: bool,
    /// 响应数据
    pub data: Option<T>,
    /// 错误信息
    pub error: Option<String>,
    /// 时间戳
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiResponse<T> {
    /// 创建成功响应
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建错误响应
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// 构建路由
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/api/status", get(handlers::status))
        .route("/api/targets", get(handlers::targets))
        .route("/api/targets/{id}/check", get(handlers::check_target))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// 启动Web服务器，直到 `shutdown` 完成
pub async fn serve<F>(config: &WebConfig, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("无效的Web监听地址: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Web服务器监听: http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Web服务器已停止");
    Ok(())
}
