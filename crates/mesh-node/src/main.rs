//! # Mesh Node
//!
//! Entry point of one control-plane replica.
//!
//! ## Startup Sequence
//!
//! 1. Initialize telemetry (logging + metrics)
//! 2. Load and validate `MESH_*` configuration
//! 3. Build the node container (RAM store, durable store, event bus)
//! 4. Register replica handlers and enter the configured role
//! 5. Serve Prometheus metrics on `/metrics` until Ctrl-C
//! 6. Shut the event bus down

use std::net::SocketAddr;

use anyhow::{Context, Result};
use mesh_node::adapters::serve_metrics;
use mesh_node::{NodeConfig, NodeContainer};
use mesh_telemetry::{init_telemetry, TelemetryConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    let metrics_port = telemetry.metrics_port;
    let _guard = init_telemetry(telemetry).context("Failed to initialize telemetry")?;

    let config = NodeConfig::from_env().context("Failed to load configuration")?;
    info!("===========================================");
    info!("  Mesh Control Plane Node v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!(
        pod_id = %config.identity.pod_id,
        role = %config.role.role,
        bus = %config.identity.bus_listen_addr,
        storage = %config.storage.backend,
        "Configuration loaded"
    );

    let node = NodeContainer::build(config).context("Failed to build node")?;
    node.start().await.context("Failed to enter configured role")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = if metrics_port == 0 {
        None
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics endpoint on {addr}"))?;
        Some(tokio::spawn(serve_metrics(listener, shutdown_rx)))
    };

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    info!("Initiating graceful shutdown...");
    shutdown_tx.send_replace(true);
    node.shutdown().await;
    if let Some(task) = metrics {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Metrics endpoint failed"),
            Err(e) => warn!(error = %e, "Metrics endpoint task failed"),
        }
    }
    info!("Shutdown complete");
    Ok(())
}
