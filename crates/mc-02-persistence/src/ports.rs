//! # Outbound Ports (Driven Ports)
//!
//! Interfaces the host application implements for the durable store.
//!
//! Production: `RocksDbDurableStore` (mesh-node/adapters/storage/rocksdb_adapter.rs)
//! Testing: [`InMemoryDurableStore`](crate::adapters::InMemoryDurableStore)

use shared_types::{Entity, Table};

use crate::errors::PersistenceError;

/// Callback run inside one durable transaction.
pub type TxBody<'a> = dyn FnMut(&mut dyn DurableTx) -> Result<(), PersistenceError> + 'a;

/// Abstract interface for the durable backing store.
pub trait DurableStore: RowSource + Send + Sync {
    /// Runs `body` inside one transaction.
    ///
    /// ## Atomicity Guarantee
    ///
    /// The transaction commits only if `body` returns `Ok`. On `Err` every
    /// write made by `body` is discarded and the error is returned as is.
    fn with_tx_batch(&self, body: &mut TxBody<'_>) -> Result<(), PersistenceError>;
}

/// Row-level operations available inside [`DurableStore::with_tx_batch`].
pub trait DurableTx {
    /// Inserts a new row. Fails if the id exists or a parent row is missing.
    fn insert(&mut self, row: &Entity) -> Result<(), PersistenceError>;

    /// Replaces an existing row.
    fn update(&mut self, row: &Entity) -> Result<(), PersistenceError>;

    /// Deletes a row. Fails if another row still references it.
    fn delete(&mut self, table: Table, id: &str) -> Result<(), PersistenceError>;

    /// Live fencing check: does the durable store still name this pod master?
    fn is_current_pod_defined_as_master(&mut self) -> Result<bool, PersistenceError>;
}

/// Anything that can hand out the full content of a table.
///
/// The durable store is one source; a decoded snapshot is another.
pub trait RowSource {
    fn rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError>;
}
