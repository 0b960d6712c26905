//! # Replication Flow
//!
//! ```text
//! master.write ──▶ RAM + durable ──changes──▶ follower(s) ──▶ ReplicaApplier
//! ```
//!
//! Followers bootstrap from the master's snapshot, then follow the
//! `changes` stream.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mc_01_ram_store::MemDb;
    use mesh_node::NodeContainer;
    use shared_bus::{topics, BusMessage};
    use shared_types::{ChangeRecord, ChangeSet, NodeRole, Table};

    use crate::integration::{cluster, endpoint, eventually, listener, node_config, route};

    async fn start_master(pod_id: &str) -> NodeContainer {
        let master = NodeContainer::build(node_config(pod_id, NodeRole::Master, None)).unwrap();
        master.start().await.unwrap();
        master
    }

    async fn start_follower(pod_id: &str, master: &NodeContainer) -> NodeContainer {
        let addr = master.publisher_addr().await.unwrap();
        let follower =
            NodeContainer::build(node_config(pod_id, NodeRole::Slave, Some(addr))).unwrap();
        follower.start().await.unwrap();
        follower
    }

    async fn wait_for_streams(master: &NodeContainer, count: usize) {
        let bus = Arc::clone(master.bus());
        assert!(
            eventually(|| {
                let bus = Arc::clone(&bus);
                async move { bus.live_subscriptions(topics::CHANGES).await >= count }
            })
            .await,
            "followers never subscribed"
        );
    }

    fn cluster_name(db: &MemDb, id: &str) -> Option<String> {
        db.begin(false)
            .get_by_id(Table::Clusters, id)
            .unwrap()
            .and_then(|row| row.field("name"))
    }

    #[tokio::test]
    async fn test_follower_bootstraps_then_follows_live_writes() {
        let master = start_master("pod-a").await;
        master
            .replication()
            .write(|txn| {
                txn.insert(cluster("c-1", "payments"))?;
                txn.insert(endpoint("e-1", "c-1", 8080))
            })
            .await
            .unwrap();

        let follower = start_follower("pod-b", &master).await;
        // Restored from the snapshot.
        assert_eq!(follower.db().len(Table::Clusters), 1);
        assert_eq!(follower.db().len(Table::Endpoints), 1);

        wait_for_streams(&master, 1).await;
        master
            .replication()
            .write(|txn| {
                txn.insert(listener("l-1", 443))?;
                txn.insert(route("r-1", "l-1", "c-1", "/pay"))?;
                txn.insert(route("r-2", "l-1", "c-1", "/refund"))?;
                txn.insert(route("r-3", "l-1", "c-1", "/status"))
            })
            .await
            .unwrap();

        let db = Arc::clone(follower.db());
        assert!(eventually(|| {
            let db = Arc::clone(&db);
            async move { db.len(Table::Routes) == 3 }
        })
        .await);
        assert_eq!(follower.db().len(Table::Listeners), 1);

        master
            .replication()
            .write(|txn| txn.delete(Table::Routes, "r-2"))
            .await
            .unwrap();
        assert!(eventually(|| {
            let db = Arc::clone(&db);
            async move { db.len(Table::Routes) == 2 }
        })
        .await);

        follower.shutdown().await;
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_every_follower_sees_writes_in_commit_order() {
        let master = start_master("pod-a").await;
        master
            .replication()
            .write(|txn| txn.insert(cluster("c-1", "v0")))
            .await
            .unwrap();

        let first = start_follower("pod-b", &master).await;
        let second = start_follower("pod-c", &master).await;
        wait_for_streams(&master, 2).await;

        for version in 1..=20 {
            let name = format!("v{version}");
            master
                .replication()
                .write(move |txn| txn.insert(cluster("c-1", &name)))
                .await
                .unwrap();
        }

        for follower in [&first, &second] {
            let db = Arc::clone(follower.db());
            assert!(eventually(|| {
                let db = Arc::clone(&db);
                async move { cluster_name(&db, "c-1").as_deref() == Some("v20") }
            })
            .await);
        }

        first.shutdown().await;
        second.shutdown().await;
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_group_change_reaches_follower_atomically() {
        let master = start_master("pod-a").await;
        let follower = start_follower("pod-b", &master).await;
        wait_for_streams(&master, 1).await;

        let group = vec![
            ChangeSet::new(vec![ChangeRecord::insert(cluster("c-1", "a"))]),
            ChangeSet::new(vec![
                ChangeRecord::insert(cluster("c-2", "b")),
                ChangeRecord::insert(endpoint("e-1", "c-2", 9000)),
            ]),
        ];
        master
            .bus()
            .publish(topics::CHANGES, &BusMessage::MultiNodeGroupChange(group))
            .await
            .unwrap();

        let db = Arc::clone(follower.db());
        assert!(eventually(|| {
            let db = Arc::clone(&db);
            async move { db.len(Table::Endpoints) == 1 }
        })
        .await);
        assert_eq!(follower.db().len(Table::Clusters), 2);

        follower.shutdown().await;
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_followers_reject_direct_writes() {
        let master = start_master("pod-a").await;
        let follower = start_follower("pod-b", &master).await;

        let result = follower
            .replication()
            .write(|txn| txn.insert(cluster("c-1", "a")))
            .await;
        assert!(result.unwrap_err().is_retry_later());
        assert!(follower.db().is_empty());

        follower.shutdown().await;
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_unique_name_swap_reaches_follower() {
        let master = start_master("pod-a").await;
        master
            .replication()
            .write(|txn| {
                txn.insert(cluster("a", "x"))?;
                txn.insert(cluster("b", "y"))
            })
            .await
            .unwrap();
        let follower = start_follower("pod-b", &master).await;
        wait_for_streams(&master, 1).await;

        master
            .replication()
            .write(|txn| {
                txn.insert(cluster("a", "tmp"))?;
                txn.insert(cluster("b", "x"))?;
                txn.insert(cluster("a", "y"))
            })
            .await
            .unwrap();

        let db = Arc::clone(follower.db());
        assert!(eventually(|| {
            let db = Arc::clone(&db);
            async move { cluster_name(&db, "a").as_deref() == Some("y") }
        })
        .await);
        assert_eq!(cluster_name(follower.db(), "b").as_deref(), Some("x"));
        assert!(!follower.applier().is_diverged());

        follower.shutdown().await;
        master.shutdown().await;
    }

    #[tokio::test]
    async fn test_diverged_follower_resyncs_from_snapshot() {
        let master = start_master("pod-a").await;
        let follower = start_follower("pod-b", &master).await;
        wait_for_streams(&master, 1).await;

        // A stray local row makes the next replicated insert clash on name.
        {
            let mut txn = follower.db().begin(true);
            txn.insert(cluster("stray", "payments")).unwrap();
            txn.commit().unwrap();
        }
        master
            .replication()
            .write(|txn| txn.insert(cluster("c-1", "payments")))
            .await
            .unwrap();

        let db = Arc::clone(follower.db());
        assert!(eventually(|| {
            let db = Arc::clone(&db);
            async move { cluster_name(&db, "c-1").is_some() && cluster_name(&db, "stray").is_none() }
        })
        .await);
        assert!(!follower.applier().is_diverged());

        // Back on the live stream.
        master
            .replication()
            .write(|txn| txn.insert(endpoint("e-1", "c-1", 8080)))
            .await
            .unwrap();
        let db = Arc::clone(follower.db());
        assert!(eventually(|| {
            let db = Arc::clone(&db);
            async move { db.len(Table::Endpoints) == 1 }
        })
        .await);

        follower.shutdown().await;
        master.shutdown().await;
    }
}
