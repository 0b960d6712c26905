//! # Mesh Telemetry
//!
//! Observability for the mesh control plane.
//!
//! ## Components
//!
//! - **Logging**: `tracing` subscriber with env-filter, plain or JSON output
//! - **Metrics**: Prometheus counters and gauges in a private registry
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_telemetry(TelemetryConfig::from_env())?;
//!     // Logs and metrics are now collected
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `OTEL_SERVICE_NAME` | `mesh-control-plane` | Service name in logs |
//! | `MESH_LOG_LEVEL` | `info` | Log filter (falls back to `RUST_LOG`) |
//! | `MESH_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `MESH_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `MESH_METRICS_PORT` | `9100` | Prometheus endpoint port |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};
pub use metrics::{
    gather_metrics, register_metrics, MetricsHandle, BUS_DEFERRED_EVICTED, BUS_EVENTS_DEFERRED,
    BUS_EVENTS_PUBLISHED, BUS_LIVE_SUBSCRIPTIONS, BUS_SUBSCRIBER_RECONNECTS, FENCED_FLUSHES,
    FLUSHES, REPLICA_APPLY_FAILURES, REPLICA_RESYNCS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(&config)?;

    tracing::info!(
        service = %config.service_name,
        metrics_port = config.metrics_port,
        collectors = metrics.registered(),
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}

/// Convenience macro for recording a metric increment.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
