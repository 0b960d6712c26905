//! # Event Bus Aggregator
//!
//! The only bus component the rest of the node talks to. Combines the
//! internal bus with whichever network side the node's role calls for.
//!
//! | Role | Network side | `publish` | `subscribe` |
//! |------|--------------|-----------|-------------|
//! | Master | [`NetworkPublisher`] | internal + network | internal |
//! | Slave | [`NetworkSubscriber`] | internal | internal + network |
//! | Standby | none | internal | internal |
//!
//! Every handler passed to [`EventBusAggregator::subscribe`] is remembered so
//! it can be attached to a new master's stream after a role change.
//!
//! ## Locking
//!
//! Public operations share a read lock on the role state; only
//! [`EventBusAggregator::restart_event_bus`] and
//! [`EventBusAggregator::shutdown`] take it exclusively.
//! [`EventBusAggregator::get_snapshot`] releases the lock before pulling, so
//! a slow master never blocks a role change; the role change's shutdown
//! cancels the pull instead.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use shared_types::{NodeInfo, NodeRole};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::errors::BusError;
use crate::events::{topics, BusMessage, LocalNotice};
use crate::internal::{Handler, InternalBus};
use crate::publisher::{NetworkPublisher, SnapshotSource};
use crate::subscriber::NetworkSubscriber;

enum Network {
    Idle,
    Publisher(NetworkPublisher),
    Subscriber(Arc<NetworkSubscriber>),
}

impl Network {
    async fn shutdown(self) {
        match self {
            Network::Idle => {}
            Network::Publisher(publisher) => publisher.shutdown().await,
            Network::Subscriber(subscriber) => subscriber.shutdown().await,
        }
    }
}

struct AggregatorState {
    role: Option<NodeRole>,
    node: Option<NodeInfo>,
    network: Network,
}

impl AggregatorState {
    /// Whether switching to `role` on `node` would change nothing.
    fn is_current(&self, node: &NodeInfo, role: NodeRole) -> bool {
        if self.role != Some(role) {
            return false;
        }
        let Some(current) = &self.node else {
            return false;
        };
        match role {
            NodeRole::Master => current.bus_addr == node.bus_addr,
            NodeRole::Slave => current.master_bus_addr == node.master_bus_addr,
            NodeRole::Standby => true,
        }
    }
}

/// Internal plus network bus, switched by cluster role.
pub struct EventBusAggregator {
    config: BusConfig,
    client_id: String,
    internal: InternalBus,
    snapshot: Option<Arc<dyn SnapshotSource>>,
    handlers: Mutex<Vec<(String, Handler)>>,
    state: RwLock<AggregatorState>,
}

impl EventBusAggregator {
    /// Creates an aggregator with no network side. `client_id` identifies
    /// this node to masters and must stay stable for the process lifetime.
    pub fn new(client_id: impl Into<String>, config: BusConfig) -> Self {
        Self {
            config,
            client_id: client_id.into(),
            internal: InternalBus::new(),
            snapshot: None,
            handlers: Mutex::new(Vec::new()),
            state: RwLock::new(AggregatorState {
                role: None,
                node: None,
                network: Network::Idle,
            }),
        }
    }

    /// Source answering followers' snapshot requests while this node is
    /// master.
    #[must_use]
    pub fn with_snapshot_source(mut self, source: Arc<dyn SnapshotSource>) -> Self {
        self.snapshot = Some(source);
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn internal(&self) -> &InternalBus {
        &self.internal
    }

    /// Publishes locally, and to followers when master.
    ///
    /// A network failure is returned to the caller; local handlers have
    /// already run by then.
    pub async fn publish(&self, topic: &str, message: &BusMessage) -> Result<(), BusError> {
        let state = self.state.read().await;
        self.internal.publish(topic, message);
        if let Network::Publisher(publisher) = &state.network {
            publisher.publish(topic, message).await?;
        }
        Ok(())
    }

    /// Registers a handler locally, and on the master's stream when slave.
    pub async fn subscribe(&self, topic: &str, handler: Handler) -> Result<(), BusError> {
        let state = self.state.read().await;
        self.handlers
            .lock()
            .push((topic.to_string(), Arc::clone(&handler)));
        self.internal.subscribe(topic, Arc::clone(&handler));
        if let Network::Subscriber(subscriber) = &state.network {
            subscriber.subscribe(topic, handler)?;
        }
        Ok(())
    }

    /// Switches the network side to match `role`.
    ///
    /// No-op when the role is unchanged and, for master and slave, the
    /// relevant address is too. On failure the node is left without a
    /// network side and the next call rebuilds it.
    pub async fn restart_event_bus(&self, node: NodeInfo, role: NodeRole) -> Result<(), BusError> {
        let mut state = self.state.write().await;
        if state.is_current(&node, role) {
            debug!(node_id = %node.node_id, %role, "Event bus already in requested role");
            return Ok(());
        }

        let previous = state.role;
        std::mem::replace(&mut state.network, Network::Idle)
            .shutdown()
            .await;
        state.role = None;
        state.node = None;

        state.network = match role {
            NodeRole::Master => Network::Publisher(
                NetworkPublisher::bind(node.bus_addr, self.config.clone(), self.snapshot.clone())
                    .await?,
            ),
            NodeRole::Slave => {
                let master = node.master_bus_addr.ok_or(BusError::NoMasterAddress)?;
                let subscriber = Arc::new(NetworkSubscriber::new(
                    master,
                    self.client_id.clone(),
                    self.config.clone(),
                ));
                let handlers = self.handlers.lock().clone();
                for (topic, handler) in handlers {
                    subscriber.subscribe(&topic, handler)?;
                }
                Network::Subscriber(subscriber)
            }
            NodeRole::Standby => Network::Idle,
        };
        info!(
            node_id = %node.node_id,
            from = ?previous,
            to = %role,
            master = ?node.master_bus_addr,
            "Event bus restarted"
        );
        state.role = Some(role);
        state.node = Some(node);
        drop(state);

        self.internal.publish(
            topics::ROLE_CHANGES,
            &BusMessage::Local(LocalNotice::RoleChanged(role)),
        );
        Ok(())
    }

    /// Pulls the master's full state. Only valid as slave.
    pub async fn get_snapshot(&self) -> Result<Vec<u8>, BusError> {
        let subscriber = match &self.state.read().await.network {
            Network::Subscriber(subscriber) => Arc::clone(subscriber),
            _ => return Err(BusError::WrongRole("slave")),
        };
        subscriber.get_snapshot().await
    }

    pub async fn role(&self) -> Option<NodeRole> {
        self.state.read().await.role
    }

    /// Address the publisher listens on, when master.
    pub async fn publisher_addr(&self) -> Option<SocketAddr> {
        match &self.state.read().await.network {
            Network::Publisher(publisher) => Some(publisher.local_addr()),
            _ => None,
        }
    }

    /// Live follower streams on a topic, when master.
    pub async fn live_subscriptions(&self, topic: &str) -> usize {
        match &self.state.read().await.network {
            Network::Publisher(publisher) => publisher.subscriber_count(topic),
            _ => 0,
        }
    }

    /// Stops the network side. Local handlers stay registered.
    pub async fn shutdown(&self) {
        let mut state = self.state.write().await;
        std::mem::replace(&mut state.network, Network::Idle)
            .shutdown()
            .await;
        state.role = None;
        state.node = None;
        info!(client_id = %self.client_id, "Event bus shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{ChangeRecord, ChangeSet, Entity, Listener};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::{sleep, timeout};

    fn master_info(id: &str) -> NodeInfo {
        NodeInfo {
            node_id: id.into(),
            bus_addr: "127.0.0.1:0".parse().unwrap(),
            master_bus_addr: None,
        }
    }

    fn slave_info(id: &str, master: SocketAddr) -> NodeInfo {
        NodeInfo {
            node_id: id.into(),
            bus_addr: "127.0.0.1:0".parse().unwrap(),
            master_bus_addr: Some(master),
        }
    }

    fn listener_change(id: &str) -> BusMessage {
        BusMessage::Change(ChangeSet::new(vec![ChangeRecord::insert(
            Entity::Listener(Listener {
                id: id.into(),
                name: format!("listener-{id}"),
                address: "0.0.0.0".into(),
                port: 8080,
            }),
        )]))
    }

    fn forwarding_handler() -> (Handler, mpsc::UnboundedReceiver<BusMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler: Handler = Arc::new(move |m: BusMessage| {
            let _ = tx.send(m);
        });
        (handler, rx)
    }

    async fn wait_for_followers(bus: &EventBusAggregator, topic: &str, n: usize) {
        timeout(Duration::from_secs(10), async {
            while bus.live_subscriptions(topic).await != n {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("followers did not connect");
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<BusMessage>) -> BusMessage {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("handler dropped")
    }

    async fn start_master(id: &str) -> (EventBusAggregator, SocketAddr) {
        let bus = EventBusAggregator::new(id, BusConfig::for_tests());
        bus.restart_event_bus(master_info(id), NodeRole::Master)
            .await
            .unwrap();
        let addr = bus.publisher_addr().await.unwrap();
        (bus, addr)
    }

    #[tokio::test]
    async fn test_master_publish_reaches_local_and_followers() {
        let (master, addr) = start_master("node-1").await;
        let (local, mut local_rx) = forwarding_handler();
        master.subscribe(topics::CHANGES, local).await.unwrap();

        let follower = EventBusAggregator::new("node-2", BusConfig::for_tests());
        let (remote, mut remote_rx) = forwarding_handler();
        follower.subscribe(topics::CHANGES, remote).await.unwrap();
        follower
            .restart_event_bus(slave_info("node-2", addr), NodeRole::Slave)
            .await
            .unwrap();
        wait_for_followers(&master, topics::CHANGES, 1).await;

        master
            .publish(topics::CHANGES, &listener_change("l-1"))
            .await
            .unwrap();
        assert_eq!(recv(&mut local_rx).await, listener_change("l-1"));
        assert_eq!(recv(&mut remote_rx).await, listener_change("l-1"));

        follower.shutdown().await;
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_restart_same_role_is_noop() {
        let (bus, addr) = start_master("node-1").await;
        bus.restart_event_bus(master_info("node-1"), NodeRole::Master)
            .await
            .unwrap();
        // A rebuild would have bound a fresh ephemeral port.
        assert_eq!(bus.publisher_addr().await, Some(addr));
        bus.shutdown().await;
        assert_eq!(bus.role().await, None);
    }

    #[tokio::test]
    async fn test_slave_requires_master_address() {
        let bus = EventBusAggregator::new("node-2", BusConfig::for_tests());
        let mut info = master_info("node-2");
        info.master_bus_addr = None;
        assert!(matches!(
            bus.restart_event_bus(info, NodeRole::Slave).await,
            Err(BusError::NoMasterAddress)
        ));
        assert_eq!(bus.role().await, None);
    }

    #[tokio::test]
    async fn test_role_change_notice_is_local() {
        let bus = EventBusAggregator::new("node-1", BusConfig::for_tests());
        let (handler, mut rx) = forwarding_handler();
        bus.subscribe(topics::ROLE_CHANGES, handler).await.unwrap();

        bus.restart_event_bus(master_info("node-1"), NodeRole::Standby)
            .await
            .unwrap();
        assert_eq!(
            recv(&mut rx).await,
            BusMessage::Local(LocalNotice::RoleChanged(NodeRole::Standby))
        );
        assert!(matches!(
            bus.get_snapshot().await,
            Err(BusError::WrongRole("slave"))
        ));
        assert_eq!(bus.publisher_addr().await, None);
    }

    #[tokio::test]
    async fn test_role_change_not_blocked_by_snapshot_pull() {
        // A master that accepts and never answers.
        let silent = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();
        let hold = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = silent.accept().await {
                open.push(stream);
            }
        });

        let follower = Arc::new(EventBusAggregator::new("node-2", BusConfig::for_tests()));
        follower
            .restart_event_bus(slave_info("node-2", addr), NodeRole::Slave)
            .await
            .unwrap();
        let pull = tokio::spawn({
            let follower = Arc::clone(&follower);
            async move { follower.get_snapshot().await }
        });
        sleep(Duration::from_millis(100)).await;

        timeout(
            Duration::from_millis(500),
            follower.restart_event_bus(master_info("node-2"), NodeRole::Standby),
        )
        .await
        .expect("role change waited for the pull")
        .unwrap();
        let result = timeout(Duration::from_millis(500), pull)
            .await
            .expect("pull outlived the old subscriber")
            .unwrap();
        assert!(matches!(result, Err(BusError::Closed)));
        hold.abort();
    }

    #[tokio::test]
    async fn test_follower_moves_to_new_master() {
        let (old_master, old_addr) = start_master("node-1").await;
        let (new_master, new_addr) = start_master("node-3").await;

        let follower = EventBusAggregator::new("node-2", BusConfig::for_tests());
        let (handler, mut rx) = forwarding_handler();
        follower
            .restart_event_bus(slave_info("node-2", old_addr), NodeRole::Slave)
            .await
            .unwrap();
        follower.subscribe(topics::CHANGES, handler).await.unwrap();
        wait_for_followers(&old_master, topics::CHANGES, 1).await;

        follower
            .restart_event_bus(slave_info("node-2", new_addr), NodeRole::Slave)
            .await
            .unwrap();
        wait_for_followers(&old_master, topics::CHANGES, 0).await;
        wait_for_followers(&new_master, topics::CHANGES, 1).await;

        new_master
            .publish(topics::CHANGES, &listener_change("l-9"))
            .await
            .unwrap();
        assert_eq!(recv(&mut rx).await, listener_change("l-9"));

        follower.shutdown().await;
        old_master.shutdown().await;
        new_master.shutdown().await;
    }
}
