//! # Adapters
//!
//! - `metrics`: Prometheus endpoint over axum
//! - `snapshot`: full-state codec served to bootstrapping followers
//! - `storage`: durable store backends

pub mod metrics;
pub mod snapshot;
pub mod storage;

pub use metrics::{metrics_router, serve_metrics};
pub use snapshot::{encode_snapshot, RamStoreSnapshot, SnapshotError, SnapshotRows};
pub use storage::open_durable_store;
