//! # Durable Store Backends
//!
//! - `memory`: [`InMemoryDurableStore`], always available
//! - `rocksdb`: [`rocksdb_adapter::RocksDbDurableStore`], behind the `rocksdb` feature

#[cfg(feature = "rocksdb")]
pub mod rocksdb_adapter;

use std::sync::Arc;

use mc_02_persistence::{DurableStore, InMemoryDurableStore};
use shared_types::NodeRole;
use tracing::info;

use crate::container::config::{NodeConfig, StorageBackend};
use crate::errors::NodeError;

/// Opens the configured durable store.
///
/// With a static master role this pod also takes the master lease, which
/// the election collaborator would otherwise write.
pub fn open_durable_store(config: &NodeConfig) -> Result<Arc<dyn DurableStore>, NodeError> {
    let pod_id = config.identity.pod_id.clone();
    let claim = config.role.role == NodeRole::Master;
    info!(backend = %config.storage.backend, pod_id = %pod_id, claim_master = claim, "Opening durable store");

    match config.storage.backend {
        StorageBackend::Memory => {
            let store = if claim {
                InMemoryDurableStore::new_master(pod_id)
            } else {
                InMemoryDurableStore::new(pod_id)
            };
            Ok(Arc::new(store))
        }
        StorageBackend::RocksDb => open_rocksdb(config, pod_id, claim),
    }
}

#[cfg(feature = "rocksdb")]
fn open_rocksdb(
    config: &NodeConfig,
    pod_id: String,
    claim: bool,
) -> Result<Arc<dyn DurableStore>, NodeError> {
    use rocksdb_adapter::{RocksDbConfig, RocksDbDurableStore};

    let rocks = RocksDbConfig {
        path: config.storage.data_dir.join("rocksdb"),
        ..RocksDbConfig::default()
    };
    let store = RocksDbDurableStore::open(rocks, pod_id)?;
    if claim {
        store.claim_master()?;
    }
    Ok(Arc::new(store))
}

#[cfg(not(feature = "rocksdb"))]
fn open_rocksdb(
    _config: &NodeConfig,
    _pod_id: String,
    _claim: bool,
) -> Result<Arc<dyn DurableStore>, NodeError> {
    Err(crate::container::config::ConfigError::BackendUnavailable(StorageBackend::RocksDb).into())
}
