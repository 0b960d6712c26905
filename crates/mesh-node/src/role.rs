//! # Role Controller
//!
//! Moves the node between master, slave and standby when the election
//! collaborator (or the static configuration) hands it a role.
//!
//! | Entering | Steps |
//! |----------|-------|
//! | Master | role set, RAM store reloaded from the durable store, bus publisher started, `Reload` published on `full-reload` |
//! | Slave | role set, bootstrap buffering on, bus subscriber started, snapshot pulled and restored, buffer replayed |
//! | Standby | role set, network side stopped |
//!
//! A follower whose applier diverged is brought back by
//! [`RoleController::run_resync`], which pulls a fresh snapshot from the
//! master whenever the applier asks for one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mc_01_ram_store::MemDb;
use mc_02_persistence::{DurableStore, PersistenceError, RowSource, StorageLoader};
use mesh_telemetry::{metric_inc, REPLICA_RESYNCS};
use shared_bus::{topics, BusMessage, EventBusAggregator};
use shared_types::{ChangeSet, Entity, NodeInfo, NodeRole, Table};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::errors::NodeError;
use crate::handlers::ReplicaApplier;

/// Reads the durable store as a plain row source.
struct DurableRows<'a>(&'a dyn DurableStore);

impl RowSource for DurableRows<'_> {
    fn rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError> {
        self.0.rows(table)
    }
}

/// Applies role transitions to the RAM store and the event bus.
pub struct RoleController {
    node_id: String,
    bus_addr: SocketAddr,
    db: Arc<MemDb>,
    store: Arc<dyn DurableStore>,
    bus: Arc<EventBusAggregator>,
    role_tx: watch::Sender<NodeRole>,
    applier: Arc<ReplicaApplier>,
    loader: StorageLoader,
}

impl RoleController {
    pub fn new(
        node_id: impl Into<String>,
        bus_addr: SocketAddr,
        db: Arc<MemDb>,
        store: Arc<dyn DurableStore>,
        bus: Arc<EventBusAggregator>,
        role_tx: watch::Sender<NodeRole>,
        applier: Arc<ReplicaApplier>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            bus_addr,
            loader: StorageLoader::new(Arc::clone(&db)),
            db,
            store,
            bus,
            role_tx,
            applier,
        }
    }

    /// Role the rest of the node currently follows.
    pub fn current(&self) -> NodeRole {
        *self.role_tx.borrow()
    }

    /// Subscribes to role updates.
    pub fn watch(&self) -> watch::Receiver<NodeRole> {
        self.role_tx.subscribe()
    }

    /// Switches the node to `role`. `master_addr` is the current master's
    /// bus address and is required for [`NodeRole::Slave`].
    pub async fn apply(
        &self,
        role: NodeRole,
        master_addr: Option<SocketAddr>,
    ) -> Result<(), NodeError> {
        let previous = self.role_tx.send_replace(role);
        info!(node_id = %self.node_id, from = %previous, to = %role, "Applying role");

        let node = NodeInfo {
            node_id: self.node_id.clone(),
            bus_addr: self.bus_addr,
            master_bus_addr: master_addr,
        };
        match role {
            NodeRole::Master => self.become_master(node).await,
            NodeRole::Slave => self.become_slave(node).await,
            NodeRole::Standby => {
                self.bus.restart_event_bus(node, NodeRole::Standby).await?;
                Ok(())
            }
        }
    }

    async fn become_master(&self, node: NodeInfo) -> Result<(), NodeError> {
        self.applier.reset();
        let loaded = self
            .loader
            .clear_and_load(&DurableRows(self.store.as_ref()))?;
        self.bus.restart_event_bus(node, NodeRole::Master).await?;

        let rows = self.all_rows()?;
        self.bus
            .publish(topics::FULL_RELOAD, &BusMessage::Reload(rows))
            .await?;
        info!(rows = loaded, "Promoted to master");
        Ok(())
    }

    async fn become_slave(&self, node: NodeInfo) -> Result<(), NodeError> {
        self.applier.begin_bootstrap();
        if let Err(e) = self.bus.restart_event_bus(node, NodeRole::Slave).await {
            self.applier.abort_bootstrap();
            return Err(e.into());
        }

        match self.bus.get_snapshot().await {
            Ok(snapshot) => {
                let rows = self.applier.finish_bootstrap(&snapshot)?;
                info!(rows, "Following master");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Snapshot bootstrap failed, left to resync");
                self.applier.mark_diverged();
                Err(e.into())
            }
        }
    }

    /// Restores a fresh master snapshot if the applier has diverged.
    ///
    /// Does nothing unless the node is a follower.
    pub async fn resync(&self) -> Result<(), NodeError> {
        if self.current() != NodeRole::Slave || !self.applier.is_diverged() {
            return Ok(());
        }
        let snapshot = self.bus.get_snapshot().await?;
        let rows = self.applier.finish_bootstrap(&snapshot)?;
        metric_inc!(REPLICA_RESYNCS, &["restored"]);
        info!(rows, "Follower resynchronized from master snapshot");
        Ok(())
    }

    /// Serves the applier's resync requests until the task is aborted.
    pub async fn run_resync(self: Arc<Self>, retry_delay: Duration) {
        loop {
            self.applier.resync_requested().await;
            if let Err(e) = self.resync().await {
                metric_inc!(REPLICA_RESYNCS, &["failed"]);
                warn!(error = %e, retry_in = ?retry_delay, "Resync failed");
                tokio::time::sleep(retry_delay).await;
                if self.applier.is_diverged() {
                    self.applier.mark_diverged();
                }
            }
        }
    }

    fn all_rows(&self) -> Result<ChangeSet, NodeError> {
        let txn = self.db.begin(false);
        let mut rows = Vec::new();
        for table in Table::RELATION_ORDER {
            rows.extend(txn.all(table)?);
        }
        Ok(ChangeSet::from_rows(rows))
    }
}
