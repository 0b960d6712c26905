//! Node-level errors.

use mc_01_ram_store::StoreError;
use mc_02_persistence::PersistenceError;
use shared_bus::BusError;
use thiserror::Error;

use crate::adapters::snapshot::SnapshotError;
use crate::container::config::ConfigError;

/// Failures while building the node or switching its role.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("RAM store error: {0}")]
    Store(#[from] StoreError),

    #[error("Durable store error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}
