//! HTTP server for the Prometheus scrape endpoint.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::refresh::SharedRefresher;
use crate::source::ExportSource;

/// Content type of the OpenMetrics text exposition.
pub const OPENMETRICS_CONTENT_TYPE: &str =
    "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Application state shared across handlers.
struct AppState<S> {
    refresher: SharedRefresher<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            refresher: self.refresher.clone(),
        }
    }
}

/// Create the HTTP router.
pub fn create_router<S: ExportSource>(refresher: SharedRefresher<S>, metrics_path: &str) -> Router {
    let state = AppState { refresher };

    Router::new()
        .route(metrics_path, get(metrics_handler::<S>))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler::<S>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint: refresh, then expose.
async fn metrics_handler<S: ExportSource>(State(state): State<AppState<S>>) -> Response {
    if let Err(e) = state.refresher.refresh().await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("refresh failed: {}\n", e),
        )
            .into_response();
    }

    match state.refresher.registry().render() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler<S: ExportSource>(State(state): State<AppState<S>>) -> Response {
    if state.refresher.is_ready() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no successful refresh yet\n",
        )
            .into_response()
    }
}

/// HTTP server configuration.
pub struct HttpServer<S> {
    refresher: SharedRefresher<S>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl<S: ExportSource> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(
        refresher: SharedRefresher<S>,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            refresher,
            listen_addr,
            metrics_path,
        }
    }

    /// Run the HTTP server until the shutdown signal is received.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let router = create_router(self.refresher, &self.metrics_path);

        let listener = tokio::net::TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        info!(
            addr = %self.listen_addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
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
    use crate::refresh::Refresher;
    use crate::registry::MetricRegistry;
    use crate::source::StaticSource;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    const DOC: &str = r#"<stateList>
  <device name="HEATING_1">
    <datapoint name="CLIMATECONTROL_RT_TC.1.ACTUAL_TEMPERATURE" type="ACTUAL_TEMPERATURE" value="21.3" valuetype="4"/>
  </device>
</stateList>"#;

    fn make_refresher(doc: &str) -> SharedRefresher<StaticSource> {
        Arc::new(Refresher::new(
            StaticSource::new(doc),
            Arc::new(MetricRegistry::default()),
        ))
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let router = create_router(make_refresher(DOC), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert!(
            content_type
                .to_str()
                .unwrap()
                .contains("application/openmetrics-text")
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("hm_temperature{"));
        assert!(body.contains("device=\"HEATING_1\""));
        assert!(body.contains("21.3"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint_refresh_failure() {
        let router = create_router(make_refresher("<stateList></broken>"), "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_refresher(DOC), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let refresher = make_refresher(DOC);
        let router = create_router(refresher.clone(), "/metrics");

        let response = router
            .clone()
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        refresher.refresh().await.unwrap();

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_refresher(DOC), "/prometheus/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/prometheus/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
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
