//! HTTP server for the Prometheus metrics endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use kea_control::ControlChannel;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::collector::SharedCollector;

/// Application state shared across handlers.
struct AppState<C> {
    collector: SharedCollector<C>,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            collector: self.collector.clone(),
        }
    }
}

/// Create the HTTP router.
fn create_router<C: ControlChannel + 'static>(
    collector: SharedCollector<C>,
    metrics_path: &str,
) -> Router {
    let state = AppState { collector };

    Router::new()
        .route(metrics_path, get(metrics_handler::<C>))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<C>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint. Each request runs a scrape.
async fn metrics_handler<C: ControlChannel + 'static>(
    State(state): State<AppState<C>>,
) -> Response {
    let body = state.collector.render().await;

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler<C: ControlChannel + 'static>(
    State(state): State<AppState<C>>,
) -> Response {
    if state.collector.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no Kea endpoint discovered yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer<C> {
    collector: SharedCollector<C>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl<C: ControlChannel + 'static> HttpServer<C> {
    /// Create a new HTTP server.
    pub fn new(
        collector: SharedCollector<C>,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            collector,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.collector, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{ScrapeCollector, ScrapeSettings};
    use crate::families::FamilyRegistry;
    use crate::mapping::{MappingTable, StatsMapper};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use kea_control::{CommandRequest, CommandResponse, ControlError, ProtocolError};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Answers like a lone DHCPv4 server with a single counter.
    struct Dhcp4Stub;

    #[async_trait]
    impl ControlChannel for Dhcp4Stub {
        fn identity(&self) -> &str {
            "/run/kea/kea4-ctrl-socket"
        }

        async fn exchange(
            &self,
            request: &CommandRequest,
        ) -> Result<Vec<CommandResponse>, ControlError> {
            let arguments = match request.command.as_str() {
                "config-get" => json!({ "Dhcp4": { "subnet4": [] } }),
                "statistic-get-all" => json!({ "pkt4-ack-sent": [[7, "2024-01-01 00:00:00"]] }),
                other => return Err(ProtocolError::UnexpectedShape(other.to_string()).into()),
            };
            Ok(vec![CommandResponse {
                result: 0,
                text: None,
                arguments: Some(arguments),
            }])
        }
    }

    fn make_collector() -> SharedCollector<Dhcp4Stub> {
        let registry = Arc::new(FamilyRegistry::new());
        let mapper = StatsMapper::new(MappingTable::kea(), registry).unwrap();
        let settings = ScrapeSettings::default();
        Arc::new(ScrapeCollector::new(vec![Dhcp4Stub], Arc::new(mapper), settings, "kea").unwrap())
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(make_collector(), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let body = body_string(response).await;
        assert!(body.contains(
            "kea_dhcp4_packets_sent_total{server=\"/run/kea/kea4-ctrl-socket\",operation=\"ack\"} 7"
        ));
        assert!(body.contains("kea_up{server=\"/run/kea/kea4-ctrl-socket\"} 1"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_collector(), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let collector = make_collector();
        let router = create_router(collector.clone(), "/metrics");

        // Not ready before the first scrape discovered anything
        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        collector.scrape().await;

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_collector(), "/kea/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/kea/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
