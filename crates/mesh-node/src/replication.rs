//! # Replication Service
//!
//! The master's write path.
//!
//! ```text
//! RAM write txn ──changes()──▶ Flusher (fenced durable txn)
//!       │                            │ ok
//!       ▼                            ▼
//!   commit()  ◀──────────────────────┘
//!       │
//!       ▼
//! EventBusAggregator::publish("changes")
//! ```
//!
//! The RAM transaction holds the writer lock until the durable transaction
//! has committed, so the RAM store never shows a change the durable store
//! refused. A sequencing lock is held from the start of the transaction
//! until its change set is handed to the bus, so writes reach followers in
//! commit order even while a slow follower makes `publish` wait.

use std::sync::Arc;

use mc_01_ram_store::{MemDb, StoreError, Txn};
use mc_02_persistence::{Flusher, PersistenceError};
use shared_bus::{topics, BusError, BusMessage, EventBusAggregator};
use shared_types::{ChangeSet, NodeRole};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Why a write was not applied.
#[derive(Debug, Error)]
pub enum WriteError {
    /// This node lost mastership while writing; retry against the new master.
    #[error("Retry later: this node is no longer master")]
    RetryLater,

    /// Writes are only accepted by the master.
    #[error("Node is {0}, writes go to the master")]
    NotMaster(NodeRole),

    #[error("RAM store rejected the write: {0}")]
    Store(#[from] StoreError),

    #[error("Durable store rejected the write: {0}")]
    Persistence(PersistenceError),

    /// Committed, but fan-out to followers failed.
    #[error("Write committed but publish failed: {0}")]
    Publish(#[from] BusError),
}

impl From<PersistenceError> for WriteError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::StaleMaster => WriteError::RetryLater,
            PersistenceError::Store(store) => WriteError::Store(store),
            other => WriteError::Persistence(other),
        }
    }
}

impl WriteError {
    #[must_use]
    pub fn is_retry_later(&self) -> bool {
        matches!(self, WriteError::RetryLater | WriteError::NotMaster(_))
    }
}

/// RAM store, durable store and bus, written together.
pub struct ReplicationService {
    db: Arc<MemDb>,
    flusher: Flusher,
    bus: Arc<EventBusAggregator>,
    role: watch::Receiver<NodeRole>,
    sequencer: Mutex<()>,
}

impl ReplicationService {
    pub fn new(
        db: Arc<MemDb>,
        flusher: Flusher,
        bus: Arc<EventBusAggregator>,
        role: watch::Receiver<NodeRole>,
    ) -> Self {
        Self {
            db,
            flusher,
            bus,
            role,
            sequencer: Mutex::new(()),
        }
    }

    pub fn db(&self) -> &Arc<MemDb> {
        &self.db
    }

    /// Runs `body` in a write transaction, persists its changes, commits
    /// them in memory and publishes them on the `changes` topic.
    pub async fn write<T, F>(&self, body: F) -> Result<T, WriteError>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<T, StoreError>,
    {
        let _sequence = self.sequencer.lock().await;
        let (value, changes) = self.commit_durably(body)?;
        if changes.is_empty() {
            return Ok(value);
        }
        self.bus
            .publish(topics::CHANGES, &BusMessage::Change(changes))
            .await?;
        Ok(value)
    }

    fn commit_durably<T, F>(&self, body: F) -> Result<(T, ChangeSet), WriteError>
    where
        F: FnOnce(&mut Txn<'_>) -> Result<T, StoreError>,
    {
        let role = *self.role.borrow();
        if role != NodeRole::Master {
            return Err(WriteError::NotMaster(role));
        }

        let mut txn = self.db.begin(true);
        let value = body(&mut txn)?;
        if txn.is_failed() {
            // commit() refuses and reports the poisoning error.
            txn.commit()?;
            return Err(StoreError::TransactionFailed("transaction poisoned".into()).into());
        }

        let changes = txn.changes();
        if let Err(e) = self.flusher.flush(&changes) {
            txn.abort();
            if e.is_retry_later() {
                info!("Write fenced, node is no longer master");
            }
            return Err(e.into());
        }
        let committed = txn.commit()?;
        debug!(records = committed.len(), "Write committed");
        Ok((value, committed))
    }
}
