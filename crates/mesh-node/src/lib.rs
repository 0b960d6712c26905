//! # Mesh Node
//!
//! One replica of the mesh control plane.
//!
//! ## Modular Structure
//!
//! - `container/` - configuration and the component container
//! - `adapters/` - durable store backends and the snapshot codec
//! - `handlers/` - replica apply of events received from the master
//! - `replication` - the master's write path
//! - `role` - master / slave / standby transitions
//!
//! ## Write Path (master)
//!
//! ```text
//! client ──▶ ReplicationService::write
//!              │ RAM txn ─▶ Flusher (fenced) ─▶ commit
//!              ▼
//!        EventBusAggregator ──TCP──▶ followers ──▶ ReplicaApplier
//! ```

pub mod adapters;
pub mod container;
pub mod errors;
pub mod handlers;
pub mod replication;
pub mod role;

pub use container::{ConfigError, NodeConfig, NodeContainer};
pub use errors::NodeError;
pub use handlers::ReplicaApplier;
pub use replication::{ReplicationService, WriteError};
pub use role::RoleController;
