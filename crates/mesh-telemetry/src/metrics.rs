//! Prometheus metrics for the replication core.
//!
//! All metrics follow the naming convention: `mesh_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g. bus_events_published_total)
//! - **Gauge**: Value that can go up or down (e.g. bus_live_subscriptions)

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Registry every metric below is registered into
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // NETWORK BUS
    // =========================================================================

    /// Events enqueued to network subscriptions
    pub static ref BUS_EVENTS_PUBLISHED: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_events_published_total", "Events enqueued to network subscriptions"),
        &["topic"]
    ).expect("metric creation failed");

    /// Events parked in the deferred registry after a failed send
    pub static ref BUS_EVENTS_DEFERRED: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_events_deferred_total", "Events deferred after a failed stream write"),
        &["topic"]
    ).expect("metric creation failed");

    /// Deferred events dropped unread when their entry expired
    pub static ref BUS_DEFERRED_EVICTED: Counter = Counter::new(
        "mesh_bus_deferred_evicted_total",
        "Deferred events discarded by TTL eviction"
    ).expect("metric creation failed");

    /// Currently open network subscription streams on the publisher
    pub static ref BUS_LIVE_SUBSCRIPTIONS: IntGauge = IntGauge::new(
        "mesh_bus_live_subscriptions",
        "Open subscription streams served by this node"
    ).expect("metric creation failed");

    /// Subscriber stream restarts
    pub static ref BUS_SUBSCRIBER_RECONNECTS: CounterVec = CounterVec::new(
        Opts::new("mesh_bus_subscriber_reconnects_total", "Subscription stream restarts"),
        &["topic"]
    ).expect("metric creation failed");

    // =========================================================================
    // REPLICA
    // =========================================================================

    /// Replicated events a follower could not apply
    pub static ref REPLICA_APPLY_FAILURES: CounterVec = CounterVec::new(
        Opts::new("mesh_replica_apply_failures_total", "Replicated events rejected by the follower's RAM store"),
        &["kind"]
    ).expect("metric creation failed");

    /// Snapshot re-bootstraps after a rejected event
    pub static ref REPLICA_RESYNCS: CounterVec = CounterVec::new(
        Opts::new("mesh_replica_resyncs_total", "Snapshot resynchronizations of a diverged follower"),
        &["outcome"]  // outcome: restored/failed
    ).expect("metric creation failed");

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    /// Flushes by outcome
    pub static ref FLUSHES: CounterVec = CounterVec::new(
        Opts::new("mesh_persistence_flushes_total", "Change-set flushes to the durable store"),
        &["outcome"]  // outcome: committed/fenced/failed/skipped
    ).expect("metric creation failed");

    /// Flushes rejected because this node lost mastership
    pub static ref FENCED_FLUSHES: Counter = Counter::new(
        "mesh_persistence_fenced_flushes_total",
        "Flushes rolled back by the stale-master check"
    ).expect("metric creation failed");
}

/// Handle returned once metrics are registered.
#[derive(Debug)]
pub struct MetricsHandle {
    registered: usize,
}

impl MetricsHandle {
    /// Number of collectors registered.
    pub fn registered(&self) -> usize {
        self.registered
    }
}

/// Register all metrics with [`REGISTRY`].
///
/// Registering twice fails with [`TelemetryError::MetricsInit`].
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Network bus
        Box::new(BUS_EVENTS_PUBLISHED.clone()),
        Box::new(BUS_EVENTS_DEFERRED.clone()),
        Box::new(BUS_DEFERRED_EVICTED.clone()),
        Box::new(BUS_LIVE_SUBSCRIPTIONS.clone()),
        Box::new(BUS_SUBSCRIBER_RECONNECTS.clone()),
        // Replica
        Box::new(REPLICA_APPLY_FAILURES.clone()),
        Box::new(REPLICA_RESYNCS.clone()),
        // Persistence
        Box::new(FLUSHES.clone()),
        Box::new(FENCED_FLUSHES.clone()),
    ];

    let registered = metrics.len();
    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle { registered })
}

/// Encode all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
