//! # Integration Scenarios
//!
//! Real nodes talking over TCP loopback.
//!
//! - `replication_flow`: master writes reach followers in order
//! - `deferred_redelivery`: a returning client gets its deferred events first
//! - `failover`: fencing of a deposed master and promotion of a follower
//! - `storage_load`: durable store to RAM store loading

pub mod deferred_redelivery;
pub mod failover;
pub mod replication_flow;
pub mod storage_load;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use mesh_node::container::config::BusSettings;
use mesh_node::NodeConfig;
use shared_types::{Cluster, Endpoint, Entity, LbPolicy, Listener, NodeRole, Route};

/// Upper bound for anything a scenario waits on.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bus settings with loopback-friendly delays.
pub fn fast_bus() -> BusSettings {
    BusSettings {
        channel_capacity: 64,
        deferred_sweep_interval: Duration::from_millis(100),
        retry_delay: Duration::from_millis(50),
        snapshot_retry_delay: Duration::from_millis(50),
        ..BusSettings::default()
    }
}

/// Node configuration on an ephemeral loopback port.
pub fn node_config(pod_id: &str, role: NodeRole, master_addr: Option<SocketAddr>) -> NodeConfig {
    mesh_telemetry::init_test_logging();
    let mut config = NodeConfig::default();
    config.identity.pod_id = pod_id.to_string();
    config.identity.client_id = format!("{pod_id}-client");
    config.identity.bus_listen_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    config.bus = fast_bus();
    config.role.role = role;
    config.role.master_addr = master_addr;
    config
}

/// Polls `check` until it holds or [`CONVERGE_TIMEOUT`] passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(CONVERGE_TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

pub fn cluster(id: &str, name: &str) -> Entity {
    Entity::Cluster(Cluster {
        id: id.into(),
        name: name.into(),
        lb_policy: LbPolicy::RoundRobin,
        connect_timeout_ms: 250,
    })
}

pub fn listener(id: &str, port: u16) -> Entity {
    Entity::Listener(Listener {
        id: id.into(),
        name: format!("listener-{id}"),
        address: "0.0.0.0".into(),
        port,
    })
}

pub fn endpoint(id: &str, cluster_id: &str, port: u16) -> Entity {
    Entity::Endpoint(Endpoint {
        id: id.into(),
        cluster_id: cluster_id.into(),
        address: "10.0.0.1".into(),
        port,
        weight: 1,
    })
}

pub fn route(id: &str, listener_id: &str, cluster_id: &str, prefix: &str) -> Entity {
    Entity::Route(Route {
        id: id.into(),
        listener_id: listener_id.into(),
        cluster_id: cluster_id.into(),
        prefix: prefix.into(),
        priority: 0,
    })
}
