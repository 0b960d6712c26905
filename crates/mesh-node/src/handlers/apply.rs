//! # Replica Apply
//!
//! Converges a follower's RAM store with the master's by applying the
//! events received on the bus.
//!
//! | Message | Effect |
//! |---------|--------|
//! | `Change` | records applied in order, one transaction |
//! | `MultiNodeGroupChange` | every set applied in order, one transaction |
//! | `Reload` | store cleared and refilled from the carried rows |
//! | `Snapshot` | store cleared and refilled from the decoded snapshot |
//!
//! Inserts and updates are upserts and deleting a missing row is a no-op,
//! so replaying an event the store already reflects changes nothing.
//!
//! ## Bootstrap
//!
//! Between [`ReplicaApplier::begin_bootstrap`] and
//! [`ReplicaApplier::finish_bootstrap`] incoming events are buffered. The
//! snapshot is restored first, then the buffer is replayed, so events that
//! raced the snapshot are not lost.
//!
//! ## Divergence
//!
//! An event the RAM store rejects leaves the follower behind its master.
//! The applier then marks itself diverged, goes back to buffering and wakes
//! whoever waits on [`ReplicaApplier::resync_requested`]; restoring a fresh
//! snapshot through [`ReplicaApplier::finish_bootstrap`] clears the mark.
//! Buffered events behind the rejected one are dropped: the next snapshot
//! is taken after they were published and already reflects them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mc_01_ram_store::{MemDb, StoreError, Txn};
use mc_02_persistence::{PersistenceError, StorageLoader};
use mesh_telemetry::{metric_inc, REPLICA_APPLY_FAILURES};
use parking_lot::Mutex;
use shared_bus::{BusMessage, Handler};
use shared_types::{ChangeSet, NodeRole};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, trace, warn};

use crate::adapters::snapshot::SnapshotRows;
use crate::errors::NodeError;

type Gate = Option<Vec<BusMessage>>;

/// Applies replicated events to the local RAM store.
pub struct ReplicaApplier {
    db: Arc<MemDb>,
    loader: StorageLoader,
    role: watch::Receiver<NodeRole>,
    /// `Some` while bootstrapping or diverged. Also serializes applies.
    gate: Mutex<Gate>,
    diverged: AtomicBool,
    resync: Notify,
}

impl ReplicaApplier {
    pub fn new(db: Arc<MemDb>, role: watch::Receiver<NodeRole>) -> Self {
        Self {
            loader: StorageLoader::new(Arc::clone(&db)),
            db,
            role,
            gate: Mutex::new(None),
            diverged: AtomicBool::new(false),
            resync: Notify::new(),
        }
    }

    /// Bus handler feeding [`ReplicaApplier::handle`].
    pub fn handler(self: &Arc<Self>) -> Handler {
        let applier = Arc::clone(self);
        Arc::new(move |message: BusMessage| applier.handle(message))
    }

    /// Applies one change set in a single transaction. Returns the number
    /// of records applied.
    pub fn apply_change_set(&self, changes: &ChangeSet) -> Result<usize, StoreError> {
        self.apply_change_sets(std::slice::from_ref(changes))
    }

    /// Applies several change sets, in order, in a single transaction.
    pub fn apply_change_sets(&self, sets: &[ChangeSet]) -> Result<usize, StoreError> {
        let mut txn = self.db.begin(true);
        let mut applied = 0;
        for changes in sets {
            applied += apply_records(&mut txn, changes)?;
        }
        txn.commit()?;
        Ok(applied)
    }

    /// Replaces the store with the rows of a reload.
    pub fn apply_reload(&self, rows: &ChangeSet) -> Result<usize, PersistenceError> {
        self.loader
            .clear_and_load(&SnapshotRows::from_change_set(rows))
    }

    /// Replaces the store with a decoded snapshot.
    pub fn restore_snapshot(&self, bytes: &[u8]) -> Result<usize, NodeError> {
        let rows = SnapshotRows::decode(bytes)?;
        Ok(self.loader.clear_and_load(&rows)?)
    }

    /// Starts buffering incoming events.
    pub fn begin_bootstrap(&self) {
        let mut gate = self.gate.lock();
        if gate.is_none() {
            *gate = Some(Vec::new());
            debug!("Bootstrap started, buffering replicated events");
        }
    }

    /// Restores `snapshot`, then replays and stops buffering.
    ///
    /// If the snapshot cannot be restored the applier stays diverged and
    /// keeps buffering.
    pub fn finish_bootstrap(&self, snapshot: &[u8]) -> Result<usize, NodeError> {
        let mut gate = self.gate.lock();
        let restored = match self.restore_snapshot(snapshot) {
            Ok(rows) => rows,
            Err(e) => {
                self.diverge(&mut gate, "snapshot", &e);
                return Err(e);
            }
        };
        self.diverged.store(false, Ordering::SeqCst);

        let buffered = gate.take().unwrap_or_default();
        info!(rows = restored, buffered = buffered.len(), "Bootstrap snapshot applied");
        for message in buffered {
            if !self.apply_or_diverge(&mut gate, message) {
                break;
            }
        }
        Ok(restored)
    }

    /// Stops buffering and replays the buffer without a snapshot.
    pub fn abort_bootstrap(&self) {
        let mut gate = self.gate.lock();
        if let Some(buffered) = gate.take() {
            warn!(buffered = buffered.len(), "Bootstrap aborted");
            for message in buffered {
                if !self.apply_or_diverge(&mut gate, message) {
                    break;
                }
            }
        }
    }

    /// Drops buffered events and the diverged mark, ahead of a reload from
    /// the durable store.
    pub fn reset(&self) {
        let mut gate = self.gate.lock();
        if let Some(buffered) = gate.take() {
            debug!(dropped = buffered.len(), "Replica buffer discarded");
        }
        self.diverged.store(false, Ordering::SeqCst);
    }

    /// Marks the store as behind its master and asks for a resync.
    pub fn mark_diverged(&self) {
        let mut gate = self.gate.lock();
        self.enter_diverged(&mut gate);
    }

    /// True from a rejected event until a snapshot is restored.
    pub fn is_diverged(&self) -> bool {
        self.diverged.load(Ordering::SeqCst)
    }

    /// Completes once a resync has been asked for since the last call.
    pub async fn resync_requested(&self) {
        self.resync.notified().await;
    }

    /// Entry point for bus messages.
    ///
    /// The internal bus hands a master its own publishes; those already
    /// reflect the master's store and are skipped.
    pub fn handle(&self, message: BusMessage) {
        if *self.role.borrow() == NodeRole::Master {
            trace!(kind = message.kind_name(), "Master ignores replicated event");
            return;
        }
        let mut gate = self.gate.lock();
        if let Some(buffer) = gate.as_mut() {
            buffer.push(message);
            return;
        }
        self.apply_or_diverge(&mut gate, message);
    }

    /// Applies `message`; on rejection diverges and returns false.
    fn apply_or_diverge(&self, gate: &mut Gate, message: BusMessage) -> bool {
        let kind = message.kind_name();
        match self.apply_message(message) {
            Ok(Some(records)) => {
                debug!(kind, records, "Replicated event applied");
                true
            }
            Ok(None) => true,
            Err(e) => {
                self.diverge(gate, kind, &e);
                false
            }
        }
    }

    fn apply_message(&self, message: BusMessage) -> Result<Option<usize>, NodeError> {
        let records = match message {
            BusMessage::Change(changes) => self.apply_change_set(&changes)?,
            BusMessage::MultiNodeGroupChange(sets) => self.apply_change_sets(&sets)?,
            BusMessage::Reload(rows) => self.apply_reload(&rows)?,
            BusMessage::Snapshot(bytes) => self.restore_snapshot(&bytes)?,
            BusMessage::Local(_) => return Ok(None),
        };
        Ok(Some(records))
    }

    fn diverge(&self, gate: &mut Gate, kind: &'static str, error: &NodeError) {
        warn!(kind, error = %error, "Replicated event rejected, resynchronizing from snapshot");
        metric_inc!(REPLICA_APPLY_FAILURES, &[kind]);
        self.enter_diverged(gate);
    }

    fn enter_diverged(&self, gate: &mut Gate) {
        self.diverged.store(true, Ordering::SeqCst);
        if gate.is_none() {
            *gate = Some(Vec::new());
        }
        self.resync.notify_one();
    }
}

fn apply_records(txn: &mut Txn<'_>, changes: &ChangeSet) -> Result<usize, StoreError> {
    let mut applied = 0;
    for record in changes.records() {
        match (&record.before, &record.after) {
            (_, Some(row)) => txn.insert(row.clone())?,
            (Some(row), None) => {
                txn.delete(record.table, row.id())?;
            }
            (None, None) => continue,
        }
        applied += 1;
    }
    Ok(applied)
}
