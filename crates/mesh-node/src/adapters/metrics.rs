//! # Metrics Endpoint
//!
//! Prometheus text exposition on `GET /metrics`. Anything else is a 404.

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use mesh_telemetry::gather_metrics;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Content type of the Prometheus text format.
const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Router serving the metrics registry.
pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

async fn metrics_handler() -> impl IntoResponse {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, [(header::CONTENT_TYPE, PROMETHEUS_TEXT)], body),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Serves [`metrics_router`] on `listener` until `shutdown` turns true.
pub async fn serve_metrics(
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Serving Prometheus metrics");
    }
    axum::serve(listener, metrics_router())
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}
