//! # Node Container
//!
//! Builds every component of a replica once, in dependency order, and hands
//! them out by `Arc`.
//!
//! ```text
//! MemDb ─┬─▶ ReplicaApplier ◀── bus handlers (changes, full-reload)
//!        ├─▶ RamStoreSnapshot ──▶ EventBusAggregator
//!        ├─▶ ReplicationService ◀── Flusher ◀── DurableStore
//!        └─▶ RoleController
//! ```
//!
//! One role channel is shared by the flusher, the applier, the replication
//! service and the role controller. [`NodeContainer::start`] also spawns the
//! resync task that re-bootstraps a diverged follower.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use mc_01_ram_store::{MemDb, Schema};
use mc_02_persistence::{DurableStore, Flusher};
use parking_lot::Mutex;
use shared_bus::{topics, EventBusAggregator};
use shared_types::NodeRole;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub use config::{ConfigError, NodeConfig};

use crate::adapters::snapshot::RamStoreSnapshot;
use crate::adapters::storage::open_durable_store;
use crate::errors::NodeError;
use crate::handlers::ReplicaApplier;
use crate::replication::ReplicationService;
use crate::role::RoleController;

/// Every long-lived component of one replica.
pub struct NodeContainer {
    pub config: NodeConfig,
    db: Arc<MemDb>,
    store: Arc<dyn DurableStore>,
    bus: Arc<EventBusAggregator>,
    applier: Arc<ReplicaApplier>,
    replication: Arc<ReplicationService>,
    roles: Arc<RoleController>,
    resync_task: Mutex<Option<JoinHandle<()>>>,
}

impl NodeContainer {
    /// Validates `config`, opens the configured durable store and builds
    /// the node around it.
    pub fn build(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let store = open_durable_store(&config)?;
        Self::with_store(config, store)
    }

    /// Builds the node around an already opened durable store.
    pub fn with_store(config: NodeConfig, store: Arc<dyn DurableStore>) -> Result<Self, NodeError> {
        let db = Arc::new(MemDb::new(Schema::mesh())?);
        let (role_tx, role_rx) = watch::channel(NodeRole::Standby);

        let bus = Arc::new(
            EventBusAggregator::new(config.identity.client_id.clone(), config.bus.to_bus_config())
                .with_snapshot_source(Arc::new(RamStoreSnapshot::new(Arc::clone(&db)))),
        );
        let applier = Arc::new(ReplicaApplier::new(Arc::clone(&db), role_rx.clone()));
        let flusher = Flusher::new(Arc::clone(&store)).with_role(role_rx.clone());
        let replication = Arc::new(ReplicationService::new(
            Arc::clone(&db),
            flusher,
            Arc::clone(&bus),
            role_rx,
        ));
        let roles = Arc::new(RoleController::new(
            config.identity.pod_id.clone(),
            config.identity.bus_listen_addr,
            Arc::clone(&db),
            Arc::clone(&store),
            Arc::clone(&bus),
            role_tx,
            Arc::clone(&applier),
        ));

        info!(
            pod_id = %config.identity.pod_id,
            client_id = %config.identity.client_id,
            backend = %config.storage.backend,
            "Node container built"
        );
        Ok(Self {
            config,
            db,
            store,
            bus,
            applier,
            replication,
            roles,
            resync_task: Mutex::new(None),
        })
    }

    /// Registers the replica handlers and enters the configured role.
    pub async fn start(&self) -> Result<(), NodeError> {
        let handler = self.applier.handler();
        self.bus.subscribe(topics::CHANGES, Arc::clone(&handler)).await?;
        self.bus.subscribe(topics::FULL_RELOAD, handler).await?;
        {
            let mut task = self.resync_task.lock();
            if task.is_none() {
                let roles = Arc::clone(&self.roles);
                *task = Some(tokio::spawn(
                    roles.run_resync(self.config.bus.snapshot_retry_delay),
                ));
            }
        }
        self.set_role(self.config.role.role, self.config.role.master_addr)
            .await
    }

    /// Hands the node a new role, as the election collaborator would.
    pub async fn set_role(
        &self,
        role: NodeRole,
        master_addr: Option<SocketAddr>,
    ) -> Result<(), NodeError> {
        self.roles.apply(role, master_addr).await
    }

    pub fn role(&self) -> NodeRole {
        self.roles.current()
    }

    pub fn db(&self) -> &Arc<MemDb> {
        &self.db
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<EventBusAggregator> {
        &self.bus
    }

    pub fn replication(&self) -> &Arc<ReplicationService> {
        &self.replication
    }

    /// Address followers reach the publisher on, while master.
    pub async fn publisher_addr(&self) -> Option<SocketAddr> {
        self.bus.publisher_addr().await
    }

    pub fn applier(&self) -> &Arc<ReplicaApplier> {
        &self.applier
    }

    /// Stops the resync task and the network side of the bus.
    pub async fn shutdown(&self) {
        if let Some(task) = self.resync_task.lock().take() {
            task.abort();
        }
        self.bus.shutdown().await;
        info!(pod_id = %self.config.identity.pod_id, "Node stopped");
    }
}
