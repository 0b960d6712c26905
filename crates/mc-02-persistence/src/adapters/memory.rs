//! In-memory durable store.
//!
//! Enforces foreign keys and rolls back failed transactions the way a
//! relational backend would. Used by tests and by nodes configured with the
//! `memory` storage backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{Entity, EntityId, Table};
use tracing::debug;

use crate::errors::PersistenceError;
use crate::ports::{DurableStore, DurableTx, RowSource, TxBody};

#[derive(Debug, Clone, Default)]
struct DurableState {
    tables: HashMap<Table, BTreeMap<EntityId, Entity>>,
    master: Option<String>,
}

/// Durable store held in process memory.
///
/// Each value is one pod's connection; [`InMemoryDurableStore::connect`]
/// opens another pod's connection to the same data.
#[derive(Debug)]
pub struct InMemoryDurableStore {
    pod_id: String,
    state: Arc<Mutex<DurableState>>,
}

impl InMemoryDurableStore {
    /// Empty store as seen by pod `pod_id`. No pod holds the master lease.
    pub fn new(pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            state: Arc::new(Mutex::new(DurableState::default())),
        }
    }

    /// Connection of pod `pod_id` to the same data and master lease.
    pub fn connect(&self, pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            state: Arc::clone(&self.state),
        }
    }

    /// Empty store where `pod_id` already holds the master lease.
    pub fn new_master(pod_id: impl Into<String>) -> Self {
        let store = Self::new(pod_id);
        let pod = store.pod_id.clone();
        store.set_master(Some(&pod));
        store
    }

    /// Records which pod holds the master lease.
    pub fn set_master(&self, pod_id: Option<&str>) {
        self.state.lock().master = pod_id.map(str::to_string);
    }

    /// Pod currently holding the master lease.
    pub fn master(&self) -> Option<String> {
        self.state.lock().master.clone()
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Committed rows in a table.
    pub fn len(&self, table: Table) -> usize {
        self.state.lock().tables.get(&table).map_or(0, BTreeMap::len)
    }

    pub fn get(&self, table: Table, id: &str) -> Option<Entity> {
        self.state
            .lock()
            .tables
            .get(&table)
            .and_then(|rows| rows.get(id).cloned())
    }
}

impl RowSource for InMemoryDurableStore {
    fn rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError> {
        Ok(self
            .state
            .lock()
            .tables
            .get(&table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }
}

impl DurableStore for InMemoryDurableStore {
    fn with_tx_batch(&self, body: &mut TxBody<'_>) -> Result<(), PersistenceError> {
        let mut committed = self.state.lock();
        let mut tx = MemoryTx {
            pod_id: &self.pod_id,
            staged: committed.clone(),
            ops: 0,
        };
        body(&mut tx)?;
        debug!(ops = tx.ops, "Durable transaction committed");
        *committed = tx.staged;
        Ok(())
    }
}

struct MemoryTx<'a> {
    pod_id: &'a str,
    staged: DurableState,
    ops: usize,
}

impl MemoryTx<'_> {
    fn contains(&self, table: Table, id: &str) -> bool {
        self.staged
            .tables
            .get(&table)
            .is_some_and(|rows| rows.contains_key(id))
    }

    fn check_parents(&self, operation: &str, row: &Entity) -> Result<(), PersistenceError> {
        for (parent, parent_id) in row.foreign_keys() {
            if !self.contains(parent, parent_id) {
                return Err(PersistenceError::durable(
                    operation,
                    format!(
                        "{} {} references missing {parent} {parent_id}",
                        row.table(),
                        row.id()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn referenced_by(&self, table: Table, id: &str) -> Option<(Table, EntityId)> {
        Table::RELATION_ORDER
            .into_iter()
            .filter(|child| child.parents().contains(&table))
            .find_map(|child| {
                self.staged.tables.get(&child)?.values().find_map(|row| {
                    row.foreign_keys()
                        .iter()
                        .any(|(t, fk)| *t == table && *fk == id)
                        .then(|| (child, row.id().to_string()))
                })
            })
    }
}

impl DurableTx for MemoryTx<'_> {
    fn insert(&mut self, row: &Entity) -> Result<(), PersistenceError> {
        if self.contains(row.table(), row.id()) {
            return Err(PersistenceError::durable(
                "insert",
                format!("duplicate key {} in {}", row.id(), row.table()),
            ));
        }
        self.check_parents("insert", row)?;
        self.staged
            .tables
            .entry(row.table())
            .or_default()
            .insert(row.id().to_string(), row.clone());
        self.ops += 1;
        Ok(())
    }

    fn update(&mut self, row: &Entity) -> Result<(), PersistenceError> {
        if !self.contains(row.table(), row.id()) {
            return Err(PersistenceError::durable(
                "update",
                format!("no row {} in {}", row.id(), row.table()),
            ));
        }
        self.check_parents("update", row)?;
        self.staged
            .tables
            .entry(row.table())
            .or_default()
            .insert(row.id().to_string(), row.clone());
        self.ops += 1;
        Ok(())
    }

    fn delete(&mut self, table: Table, id: &str) -> Result<(), PersistenceError> {
        if let Some((child, child_id)) = self.referenced_by(table, id) {
            return Err(PersistenceError::durable(
                "delete",
                format!("{table} {id} is still referenced by {child} {child_id}"),
            ));
        }
        if let Some(rows) = self.staged.tables.get_mut(&table) {
            rows.remove(id);
        }
        self.ops += 1;
        Ok(())
    }

    fn is_current_pod_defined_as_master(&mut self) -> Result<bool, PersistenceError> {
        Ok(self.staged.master.as_deref() == Some(self.pod_id))
    }
}
