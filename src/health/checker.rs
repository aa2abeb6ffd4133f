//! HTTP探测器实现
//!
//! 对单个目标执行一次健康探测，并把结果归一化为 `ProbeResult`。
//! 网络失败一律记录为 `Error` 结果，不会作为错误向调用方传播。

use crate::health::result::{ProbeOutcome, ProbeResult, TransportErrorKind};
use crate::registry::Target;
use async_trait::async_trait;
use reqwest::{Client, Method, Response};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

/// 探测器trait，定义探测接口
#[async_trait]
pub trait Prober: Send + Sync {
    /// 对目标执行一次探测
    ///
    /// # 参数
    /// * `target` - 目标配置
    /// * `deadline` - 本次探测的硬截止时间
    ///
    /// # 返回
    /// * `ProbeResult` - 归一化的探测结果
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeResult;
}

/// HTTP探测器实现
pub struct HttpProber {
    /// HTTP客户端
    client: Client,
}

impl HttpProber {
    /// 创建新的HTTP探测器
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION))
            .build()?;

        Ok(Self { client })
    }

    /// 构建HTTP请求
    fn build_request(&self, target: &Target) -> Result<reqwest::RequestBuilder, String> {
        let method = Method::from_str(&target.method.to_uppercase())
            .map_err(|_| format!("无效的HTTP方法: {}", target.method))?;

        let mut request = self.client.request(method, &target.url);
        for (key, value) in &target.headers {
            request = request.header(key, value);
        }
        Ok(request)
    }

    /// 按状态码分类响应
    fn classify_response(target: &Target, response: &Response, latency: Duration) -> ProbeResult {
        let status_code = response.status().as_u16();
        let result = ProbeResult::new(target.id.clone(), ProbeOutcome::Up)
            .with_status_code(status_code)
            .with_latency(latency);

        if is_healthy_status(status_code) {
            result
        } else {
            ProbeResult {
                outcome: ProbeOutcome::Down,
                ..result
            }
            .with_error(format!(
                "HTTP {} {}",
                status_code,
                response.status().canonical_reason().unwrap_or("Unknown")
            ))
        }
    }

    /// 传输失败的结果
    fn transport_error(
        target: &Target,
        latency: Duration,
        kind: TransportErrorKind,
        detail: String,
    ) -> ProbeResult {
        ProbeResult::new(target.id.clone(), ProbeOutcome::Error)
            .with_latency(latency)
            .with_error(detail)
            .with_error_kind(kind)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, target: &Target, deadline: Duration) -> ProbeResult {
        let start_time = Instant::now();

        let request = match self.build_request(target) {
            Ok(request) => request,
            Err(detail) => {
                return Self::transport_error(
                    target,
                    start_time.elapsed(),
                    TransportErrorKind::Request,
                    detail,
                )
            }
        };

        let response_result = timeout(deadline, request.timeout(deadline).send()).await;
        let latency = start_time.elapsed();

        let result = match response_result {
            Ok(Ok(response)) => Self::classify_response(target, &response, latency),
            Ok(Err(e)) => {
                let (kind, detail) = classify_transport_error(&e);
                Self::transport_error(target, latency, kind, detail)
            }
            Err(_) => Self::transport_error(
                target,
                latency,
                TransportErrorKind::Timeout,
                "Request timeout".to_string(),
            ),
        };

        debug!(
            "探测完成: {} outcome={} latency={}ms",
            target.id, result.outcome, result.latency_ms
        );
        result
    }
}

/// 健康状态码区间 [200, 399]
pub fn is_healthy_status(status_code: u16) -> bool {
    (200..=399).contains(&status_code)
}

/// 将请求错误归类为传输错误类别和可读描述
fn classify_transport_error(error: &reqwest::Error) -> (TransportErrorKind, String) {
    if error.is_timeout() {
        return (TransportErrorKind::Timeout, "Request timeout".to_string());
    }

    let text = error_chain(error);
    let lower = text.to_lowercase();
    if lower.contains("dns") || lower.contains("failed to lookup") {
        (TransportErrorKind::Dns, "DNS resolution failed".to_string())
    } else if lower.contains("certificate") || lower.contains("tls") || lower.contains("ssl") {
        (TransportErrorKind::Tls, "SSL/TLS certificate error".to_string())
    } else if error.is_connect() {
        (TransportErrorKind::Connect, "Connection refused".to_string())
    } else if error.is_builder() {
        (TransportErrorKind::Request, format!("Invalid request: {text}"))
    } else {
        (TransportErrorKind::Other, format!("Request failed: {text}"))
    }
}

/// 拼接错误链，便于识别底层原因
fn error_chain(error: &reqwest::Error) -> String {
    let mut text = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_target(url: &str) -> Target {
        Target::new("test", url)
    }

    #[test]
    fn test_http_prober_creation() {
        assert!(HttpProber::new().is_ok());
    }

    #[test]
    fn test_is_healthy_status() {
        assert!(is_healthy_status(200));
        assert!(is_healthy_status(204));
        assert!(is_healthy_status(301));
        assert!(is_healthy_status(399));
        assert!(!is_healthy_status(199));
        assert!(!is_healthy_status(400));
        assert!(!is_healthy_status(404));
        assert!(!is_healthy_status(503));
    }

    #[tokio::test]
    async fn test_probe_up() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let prober = HttpProber::new().unwrap();
        let target = create_test_target(&format!("{}/health", server.url()));
        let result = prober.probe(&target, Duration::from_secs(5)).await;

        mock.assert_async().await;
        assert_eq!(result.outcome, ProbeOutcome::Up);
        assert_eq!(result.status_code, Some(200));
        assert!(result.error_detail.is_none());
        assert_eq!(result.target_id, "test");
    }

    #[tokio::test]
    async fn test_probe_down_keeps_status_code() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/health")
            .with_status(503)
            .create_async()
            .await;

        let prober = HttpProber::new().unwrap();
        let target = create_test_target(&format!("{}/health", server.url()));
        let result = prober.probe(&target, Duration::from_secs(5)).await;

        assert_eq!(result.outcome, ProbeOutcome::Down);
        assert_eq!(result.status_code, Some(503));
        assert!(result.error_kind.is_none());
        assert!(result.error_detail.unwrap().contains("HTTP 503"));
    }

    #[tokio::test]
    async fn test_probe_uses_configured_method_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("HEAD", "/")
            .match_header("x-probe", "uptime")
            .with_status(204)
            .create_async()
            .await;

        let prober = HttpProber::new().unwrap();
        let target = create_test_target(&server.url())
            .with_method("head")
            .with_header("x-probe", "uptime");
        let result = prober.probe(&target, Duration::from_secs(5)).await;

        mock.assert_async().await;
        assert_eq!(result.outcome, ProbeOutcome::Up);
        assert_eq!(result.status_code, Some(204));
    }

    #[tokio::test]
    async fn test_probe_connection_refused_is_error() {
        // 绑定后立即释放端口，保证连接被拒绝
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = HttpProber::new().unwrap();
        let target = create_test_target(&format!("http://127.0.0.1:{port}/"));
        let result = prober.probe(&target, Duration::from_secs(5)).await;

        assert_eq!(result.outcome, ProbeOutcome::Error);
        assert!(result.status_code.is_none());
        assert!(result.error_kind.is_some());
        assert!(result.error_detail.is_some());
    }

    #[tokio::test]
    async fn test_probe_deadline_exceeded_is_timeout() {
        // 只接受连接、从不响应的服务端
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let prober = HttpProber::new().unwrap();
        let target = create_test_target(&format!("http://{addr}/slow"));
        let result = prober.probe(&target, Duration::from_millis(200)).await;

        assert_eq!(result.outcome, ProbeOutcome::Error);
        assert_eq!(result.error_kind, Some(TransportErrorKind::Timeout));
        assert!(result.latency_ms >= 150);
        server.abort();
    }
}
