//! Structured logging setup.
//!
//! Logs go to stdout either as human-readable lines or as JSON objects with
//! stable fields (`timestamp`, `level`, `target`, `fields`, `span`) that a log
//! shipper can parse without extra configuration.

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::{TelemetryConfig, TelemetryError};

/// Installs the global `tracing` subscriber.
///
/// Fails if the filter directive does not parse or a global subscriber is
/// already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("log level {:?}: {e}", config.log_level)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = match (config.console_output, config.json_logs) {
        (false, _) => registry.try_init(),
        (true, true) => registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init(),
        (true, false) => registry.with(fmt::layer().with_target(true)).try_init(),
    };
    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::debug!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Structured logging configured"
    );
    Ok(())
}

/// Installs a test subscriber that writes through the test harness.
///
/// Safe to call from many tests; only the first call installs anything.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
