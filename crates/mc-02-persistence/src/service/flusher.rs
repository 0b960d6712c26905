//! # Flusher
//!
//! Writes the change set of a committed RAM transaction to the durable store.
//!
//! ## Ordering
//!
//! A change set lists a transaction's operations in the order they ran, so
//! one row may appear more than once. Each row is first reduced to its net
//! effect: the row before its first record against the row after its last.
//! The durable store only enforces keys and relations, so the net effects
//! can be applied in any order that respects those.
//!
//! Net effects are grouped by table. Tables are walked in
//! [`Table::RELATION_ORDER`]: each table's inserts, then its updates. Each
//! table's deletes are pushed onto a stack and applied after all upserts,
//! popping the stack, so children are deleted before their parents.
//!
//! ## Fencing
//!
//! The last step inside the durable transaction asks the store whether this
//! pod is still the master. If not, the transaction is rolled back and the
//! flush fails with [`PersistenceError::StaleMaster`].

use std::collections::HashMap;
use std::sync::Arc;

use mesh_telemetry::{metric_inc, FENCED_FLUSHES, FLUSHES};
use shared_types::{ChangeSet, Entity, NodeRole, Table};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::PersistenceError;
use crate::ports::{DurableStore, DurableTx};

/// One durable operation of a flush plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOp<'a> {
    Insert(&'a Entity),
    Update(&'a Entity),
    Delete(Table, &'a str),
}

/// What a call to [`Flusher::flush`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The durable transaction committed this many operations.
    Committed(usize),
    /// Nothing to write.
    Empty,
    /// The node is in standby and does not write.
    SkippedStandby,
}

/// Applies change sets to a [`DurableStore`].
pub struct Flusher {
    store: Arc<dyn DurableStore>,
    role: Option<watch::Receiver<NodeRole>>,
}

impl Flusher {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store, role: None }
    }

    /// Follows the node role; flushes are skipped while it is Standby.
    #[must_use]
    pub fn with_role(mut self, role: watch::Receiver<NodeRole>) -> Self {
        self.role = Some(role);
        self
    }

    /// Persists `changes` in one fenced durable transaction.
    pub fn flush(&self, changes: &ChangeSet) -> Result<FlushOutcome, PersistenceError> {
        if changes.is_empty() {
            return Ok(FlushOutcome::Empty);
        }
        if let Some(role) = &self.role {
            if *role.borrow() == NodeRole::Standby {
                debug!(records = changes.len(), "Standby node, flush skipped");
                metric_inc!(FLUSHES, &["skipped"]);
                return Ok(FlushOutcome::SkippedStandby);
            }
        }

        let ops = plan(changes);
        let count = ops.len();

        let result = self.store.with_tx_batch(&mut |tx| {
            for op in &ops {
                apply(tx, *op)?;
            }
            if !tx.is_current_pod_defined_as_master()? {
                return Err(PersistenceError::StaleMaster);
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                debug!(ops = count, "Change set flushed");
                metric_inc!(FLUSHES, &["committed"]);
                Ok(FlushOutcome::Committed(count))
            }
            Err(PersistenceError::StaleMaster) => {
                info!(ops = count, "Flush rejected: node is no longer master");
                metric_inc!(FLUSHES, &["fenced"]);
                metric_inc!(FENCED_FLUSHES);
                Err(PersistenceError::StaleMaster)
            }
            Err(e) => {
                warn!(error = %e, ops = count, "Flush failed");
                metric_inc!(FLUSHES, &["failed"]);
                Err(e)
            }
        }
    }
}

fn apply(tx: &mut dyn DurableTx, op: FlushOp<'_>) -> Result<(), PersistenceError> {
    match op {
        FlushOp::Insert(row) => tx.insert(row),
        FlushOp::Update(row) => tx.update(row),
        FlushOp::Delete(table, id) => tx.delete(table, id),
    }
}

/// Orders the records of a change set for the durable store.
pub fn plan(changes: &ChangeSet) -> Vec<FlushOp<'_>> {
    #[derive(Default)]
    struct Group<'a> {
        inserts: Vec<&'a Entity>,
        updates: Vec<&'a Entity>,
        deletes: Vec<(Table, &'a str)>,
    }

    let mut groups: HashMap<Table, Group<'_>> = HashMap::new();
    for (table, before, after) in net_effects(changes) {
        let group = groups.entry(table).or_default();
        match (before, after) {
            (None, Some(after)) => group.inserts.push(after),
            (Some(_), Some(after)) => group.updates.push(after),
            (Some(before), None) => group.deletes.push((table, before.id())),
            (None, None) => {}
        }
    }

    let mut ops = Vec::with_capacity(changes.len());
    let mut delete_stack = Vec::new();
    for table in Table::RELATION_ORDER {
        let Some(group) = groups.remove(&table) else {
            continue;
        };
        ops.extend(group.inserts.into_iter().map(FlushOp::Insert));
        ops.extend(group.updates.into_iter().map(FlushOp::Update));
        if !group.deletes.is_empty() {
            delete_stack.push(group.deletes);
        }
    }
    while let Some(deletes) = delete_stack.pop() {
        ops.extend(deletes.into_iter().map(|(t, id)| FlushOp::Delete(t, id)));
    }
    ops
}

type NetEffect<'a> = (Table, Option<&'a Entity>, Option<&'a Entity>);

/// One entry per touched row, in first-touch order.
fn net_effects(changes: &ChangeSet) -> Vec<NetEffect<'_>> {
    let mut order: Vec<(Table, &str)> = Vec::new();
    let mut rows: HashMap<(Table, &str), (Option<&Entity>, Option<&Entity>)> = HashMap::new();

    for record in changes.records() {
        let Some(id) = record.id() else { continue };
        let key = (record.table, id);
        match rows.get_mut(&key) {
            Some(effect) => effect.1 = record.after.as_ref(),
            None => {
                order.push(key);
                rows.insert(key, (record.before.as_ref(), record.after.as_ref()));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| rows.remove(&key).map(|(before, after)| (key.0, before, after)))
        .collect()
}
