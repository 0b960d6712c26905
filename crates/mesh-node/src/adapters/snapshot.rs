//! # Snapshot Codec
//!
//! Full RAM-store state as a single byte buffer, for followers that
//! bootstrap from the master.
//!
//! ```text
//! [version:u16][tables: [(Table, [Entity])] in relation order]   (bincode)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use mc_01_ram_store::{MemDb, StoreError};
use mc_02_persistence::{PersistenceError, RowSource};
use serde::{Deserialize, Serialize};
use shared_bus::{BusError, SnapshotSource};
use shared_types::{ChangeSet, Entity, Table};
use thiserror::Error;
use tracing::debug;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Unsupported snapshot version {found} (expected {SNAPSHOT_VERSION})")]
    Version { found: u16 },

    #[error("Reading RAM store failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Serialize, Deserialize)]
struct SnapshotPayload {
    version: u16,
    tables: Vec<(Table, Vec<Entity>)>,
}

/// Serializes every committed row of `db`, from one read transaction.
pub fn encode_snapshot(db: &MemDb) -> Result<Vec<u8>, SnapshotError> {
    let txn = db.begin(false);
    let mut tables = Vec::with_capacity(Table::RELATION_ORDER.len());
    for table in Table::RELATION_ORDER {
        tables.push((table, txn.all(table)?));
    }
    let bytes = bincode::serialize(&SnapshotPayload {
        version: SNAPSHOT_VERSION,
        tables,
    })?;
    debug!(bytes = bytes.len(), "Snapshot encoded");
    Ok(bytes)
}

/// Decoded snapshot, readable table by table.
#[derive(Debug, Default)]
pub struct SnapshotRows {
    tables: HashMap<Table, Vec<Entity>>,
}

impl SnapshotRows {
    pub fn decode(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let payload: SnapshotPayload = bincode::deserialize(bytes)?;
        if payload.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::Version {
                found: payload.version,
            });
        }
        Ok(Self {
            tables: payload.tables.into_iter().collect(),
        })
    }

    /// Rows carried by a reload change set, grouped by table.
    pub fn from_change_set(changes: &ChangeSet) -> Self {
        let mut tables: HashMap<Table, Vec<Entity>> = HashMap::new();
        for record in changes.records() {
            if let Some(row) = &record.after {
                tables.entry(row.table()).or_default().push(row.clone());
            }
        }
        Self { tables }
    }

    /// Total number of rows.
    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RowSource for SnapshotRows {
    fn rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError> {
        Ok(self.tables.get(&table).cloned().unwrap_or_default())
    }
}

/// Answers followers' snapshot requests from the local RAM store.
pub struct RamStoreSnapshot {
    db: Arc<MemDb>,
}

impl RamStoreSnapshot {
    pub fn new(db: Arc<MemDb>) -> Self {
        Self { db }
    }
}

impl SnapshotSource for RamStoreSnapshot {
    fn snapshot(&self) -> Result<Vec<u8>, BusError> {
        encode_snapshot(&self.db).map_err(|e| BusError::Codec(e.to_string()))
    }
}
