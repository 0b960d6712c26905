//! # MemDb
//!
//! Owner of the committed state. Readers clone an `Arc` of the current
//! state and never block writers; writers take the single writer lock,
//! build a private copy-on-write view and swap it in on commit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use shared_types::Table;
use tracing::debug;

use crate::errors::StoreError;
use crate::schema::Schema;
use crate::table::TableData;
use crate::txn::Txn;

/// Committed state: one copy-on-write table per schema table.
#[derive(Debug, Clone)]
pub(crate) struct DbState {
    pub(crate) tables: HashMap<Table, Arc<TableData>>,
}

/// The transactional in-memory store.
pub struct MemDb {
    schema: Arc<Schema>,
    state: RwLock<Arc<DbState>>,
    writer: Mutex<()>,
}

impl MemDb {
    /// Builds an empty store after validating the schema.
    pub fn new(schema: Schema) -> Result<Self, StoreError> {
        schema.validate()?;
        let tables = schema
            .tables()
            .map(|ts| (ts.table, Arc::new(TableData::new(ts))))
            .collect();
        debug!(tables = schema.tables().count(), "RAM store initialized");
        Ok(Self {
            schema: Arc::new(schema),
            state: RwLock::new(Arc::new(DbState { tables })),
            writer: Mutex::new(()),
        })
    }

    /// Opens a transaction.
    ///
    /// A write transaction blocks until any other write transaction ends.
    /// Read transactions never block.
    pub fn begin(&self, write: bool) -> Txn<'_> {
        let writer = write.then(|| self.writer.lock());
        let snapshot = Arc::clone(&self.state.read());
        Txn::new(self, snapshot, writer)
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn publish_state(&self, state: Arc<DbState>) {
        *self.state.write() = state;
    }

    /// Number of committed rows in a table.
    #[must_use]
    pub fn len(&self, table: Table) -> usize {
        self.state
            .read()
            .tables
            .get(&table)
            .map_or(0, |t| t.len())
    }

    /// True if no table holds a committed row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Table::RELATION_ORDER.iter().all(|t| self.len(*t) == 0)
    }
}

impl std::fmt::Debug for MemDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemDb")
            .field("tables", &self.schema.tables().count())
            .finish_non_exhaustive()
    }
}
