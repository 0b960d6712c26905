//! # Transactions
//!
//! A [`Txn`] reads from the snapshot taken when it began. Write operations
//! modify a private copy; nothing is visible to other transactions until
//! [`Txn::commit`]. Dropping a transaction without committing aborts it.

use std::sync::Arc;

use parking_lot::MutexGuard;
use shared_types::{ChangeRecord, ChangeSet, Entity, Table};
use tracing::{debug, warn};

use crate::db::{DbState, MemDb};
use crate::errors::StoreError;
use crate::schema::{TableSchema, ID_INDEX};
use crate::table::TableData;

/// A read or write transaction over a [`MemDb`].
pub struct Txn<'db> {
    db: &'db MemDb,
    state: Arc<DbState>,
    writer: Option<MutexGuard<'db, ()>>,
    changes: Vec<ChangeRecord>,
    failure: Option<StoreError>,
}

impl<'db> Txn<'db> {
    pub(crate) fn new(
        db: &'db MemDb,
        state: Arc<DbState>,
        writer: Option<MutexGuard<'db, ()>>,
    ) -> Self {
        Self {
            db,
            state,
            writer,
            changes: Vec::new(),
            failure: None,
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// All rows matching `keys` on `index`.
    ///
    /// `keys` may name fewer values than the index has fields; the lookup
    /// then matches on the leading fields of a compound index.
    pub fn get(&self, table: Table, index: &str, keys: &[&str]) -> Result<Vec<Entity>, StoreError> {
        self.check_index(table, index, keys.len())?;
        let data = self.table(table)?;
        Ok(data
            .lookup(index, keys)
            .iter()
            .filter_map(|id| data.get(id).cloned())
            .collect())
    }

    /// First row matching `keys` on `index`, in index order.
    pub fn first(
        &self,
        table: Table,
        index: &str,
        keys: &[&str],
    ) -> Result<Option<Entity>, StoreError> {
        self.check_index(table, index, keys.len())?;
        let data = self.table(table)?;
        Ok(data
            .lookup(index, keys)
            .first()
            .and_then(|id| data.get(id).cloned()))
    }

    /// Every row of a table, ordered by id.
    pub fn all(&self, table: Table) -> Result<Vec<Entity>, StoreError> {
        Ok(self.table(table)?.rows().cloned().collect())
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Inserts a row, replacing any row with the same id.
    ///
    /// A unique-index conflict fails the operation and poisons the
    /// transaction: [`Txn::commit`] will refuse to apply anything.
    pub fn insert(&mut self, row: Entity) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let table = row.table();
        let schema = self.schema_for(table)?.clone();
        let data = self.table_mut(table)?;
        match data.upsert(&schema, row.clone()) {
            Ok(previous) => {
                self.changes.push(match previous {
                    Some(before) => ChangeRecord::update(before, row),
                    None => ChangeRecord::insert(row),
                });
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Deletes the row with the given id. Returns whether a row existed.
    pub fn delete(&mut self, table: Table, id: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let schema = self.schema_for(table)?.clone();
        let removed = self.table_mut(table)?.remove(&schema, id);
        match removed {
            Some(before) => {
                self.changes.push(ChangeRecord::delete(before));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deletes every row matching `keys` on `index`. Returns the count.
    ///
    /// An empty `keys` slice deletes the whole table.
    pub fn delete_all(
        &mut self,
        table: Table,
        index: &str,
        keys: &[&str],
    ) -> Result<usize, StoreError> {
        self.ensure_writable()?;
        let ids: Vec<String> = self
            .get(table, index, keys)?
            .iter()
            .map(|e| e.id().to_string())
            .collect();
        let mut deleted = 0;
        for id in ids {
            if self.delete(table, &id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// True once an operation has poisoned the transaction.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Changes made so far, in operation order.
    ///
    /// Only back-to-back operations on the same row collapse into one
    /// record, carrying the row as it was before the first and after the
    /// last of them. A row inserted and then immediately deleted produces no
    /// record. Any other sequence is kept as is, so replaying the records in
    /// order never trips a unique index the transaction itself did not.
    #[must_use]
    pub fn changes(&self) -> ChangeSet {
        coalesce(&self.changes)
    }

    /// Makes the write set visible and returns its change set.
    ///
    /// Read transactions commit to an empty change set.
    pub fn commit(mut self) -> Result<ChangeSet, StoreError> {
        if let Some(failure) = self.failure.take() {
            warn!(error = %failure, "Refusing to commit failed transaction");
            return Err(StoreError::TransactionFailed(failure.to_string()));
        }
        if self.writer.is_none() {
            return Ok(ChangeSet::default());
        }
        let changes = coalesce(&self.changes);
        self.db.publish_state(Arc::clone(&self.state));
        debug!(changes = changes.len(), "Transaction committed");
        Ok(changes)
    }

    /// Discards the transaction.
    pub fn abort(self) {
        if !self.changes.is_empty() {
            debug!(discarded = self.changes.len(), "Transaction aborted");
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.writer.is_none() {
            return Err(StoreError::ReadOnly);
        }
        if let Some(failure) = &self.failure {
            return Err(StoreError::TransactionFailed(failure.to_string()));
        }
        Ok(())
    }

    fn poison(&mut self, error: StoreError) -> StoreError {
        self.failure = Some(error.clone());
        error
    }

    fn schema_for(&self, table: Table) -> Result<&TableSchema, StoreError> {
        self.db
            .schema()
            .table(table)
            .ok_or(StoreError::UnknownTable(table))
    }

    fn check_index(&self, table: Table, index: &str, given: usize) -> Result<(), StoreError> {
        let schema = self.schema_for(table)?;
        let idx = schema.index(index).ok_or_else(|| StoreError::UnknownIndex {
            table,
            index: index.to_string(),
        })?;
        if given > idx.fields.len() {
            return Err(StoreError::TooManyKeys {
                table,
                index: index.to_string(),
                fields: idx.fields.len(),
                given,
            });
        }
        Ok(())
    }

    fn table(&self, table: Table) -> Result<&TableData, StoreError> {
        self.state
            .tables
            .get(&table)
            .map(|t| t.as_ref())
            .ok_or(StoreError::UnknownTable(table))
    }

    fn table_mut(&mut self, table: Table) -> Result<&mut TableData, StoreError> {
        let state = Arc::make_mut(&mut self.state);
        state
            .tables
            .get_mut(&table)
            .map(Arc::make_mut)
            .ok_or(StoreError::UnknownTable(table))
    }
}

/// Convenience lookup by primary key.
impl Txn<'_> {
    pub fn get_by_id(&self, table: Table, id: &str) -> Result<Option<Entity>, StoreError> {
        self.first(table, ID_INDEX, &[id])
    }
}

fn coalesce(records: &[ChangeRecord]) -> ChangeSet {
    let mut out: Vec<ChangeRecord> = Vec::with_capacity(records.len());

    for record in records {
        let Some(id) = record.id() else { continue };
        let same_row = out
            .last()
            .is_some_and(|last| last.table == record.table && last.id() == Some(id));
        if !same_row {
            out.push(record.clone());
            continue;
        }
        if let Some(last) = out.last_mut() {
            last.after = record.after.clone();
            if last.kind().is_none() {
                out.pop();
            }
        }
    }

    out.into_iter().collect()
}
