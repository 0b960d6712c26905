//! # Failover
//!
//! Two pods share one durable store. When the election moves the master
//! lease, the deposed master's writes are fenced with a retry-later signal,
//! the new master reloads from the durable store, and the old master
//! rejoins as a follower.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mc_02_persistence::{DurableStore, InMemoryDurableStore};
    use mesh_node::{NodeContainer, WriteError};
    use shared_types::{NodeRole, Table};

    use crate::integration::{cluster, endpoint, eventually, node_config};

    #[tokio::test]
    async fn test_deposed_master_is_fenced_and_rejoins_as_follower() {
        let lease_a = Arc::new(InMemoryDurableStore::new_master("pod-a"));
        let lease_b = Arc::new(lease_a.connect("pod-b"));

        let store_a: Arc<dyn DurableStore> = lease_a.clone();
        let pod_a =
            NodeContainer::with_store(node_config("pod-a", NodeRole::Master, None), store_a)
                .unwrap();
        pod_a.start().await.unwrap();
        pod_a
            .replication()
            .write(|txn| txn.insert(cluster("c-1", "payments")))
            .await
            .unwrap();

        let store_b: Arc<dyn DurableStore> = lease_b.clone();
        let pod_b =
            NodeContainer::with_store(node_config("pod-b", NodeRole::Standby, None), store_b)
                .unwrap();
        pod_b.start().await.unwrap();
        assert!(pod_b.db().is_empty());

        // The election hands the lease to pod-b before pod-a hears about it.
        lease_b.set_master(Some("pod-b"));
        let fenced = pod_a
            .replication()
            .write(|txn| txn.insert(cluster("c-2", "orders")))
            .await;
        assert!(matches!(fenced, Err(WriteError::RetryLater)));
        assert_eq!(pod_a.db().len(Table::Clusters), 1);
        assert_eq!(lease_a.len(Table::Clusters), 1);

        pod_b.set_role(NodeRole::Master, None).await.unwrap();
        assert_eq!(pod_b.db().len(Table::Clusters), 1);
        let addr_b = pod_b.publisher_addr().await.unwrap();

        pod_a.set_role(NodeRole::Slave, Some(addr_b)).await.unwrap();
        assert_eq!(pod_a.role(), NodeRole::Slave);

        let bus_b = Arc::clone(pod_b.bus());
        assert!(
            eventually(|| {
                let bus = Arc::clone(&bus_b);
                async move { bus.live_subscriptions(shared_bus::topics::CHANGES).await == 1 }
            })
            .await
        );
        pod_b
            .replication()
            .write(|txn| {
                txn.insert(cluster("c-2", "orders"))?;
                txn.insert(endpoint("e-1", "c-2", 7000))
            })
            .await
            .unwrap();

        let db_a = Arc::clone(pod_a.db());
        assert!(
            eventually(|| {
                let db = Arc::clone(&db_a);
                async move { db.len(Table::Endpoints) == 1 && db.len(Table::Clusters) == 2 }
            })
            .await
        );
        assert_eq!(lease_a.len(Table::Clusters), 2);

        pod_a.shutdown().await;
        pod_b.shutdown().await;
    }

    #[tokio::test]
    async fn test_standby_node_neither_writes_nor_listens() {
        let node = NodeContainer::build(node_config("pod-a", NodeRole::Standby, None)).unwrap();
        node.start().await.unwrap();
        assert!(node.publisher_addr().await.is_none());

        let result = node
            .replication()
            .write(|txn| txn.insert(cluster("c-1", "payments")))
            .await;
        assert!(matches!(result, Err(WriteError::NotMaster(NodeRole::Standby))));
        node.shutdown().await;
    }
}
