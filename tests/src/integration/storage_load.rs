//! # Storage Load
//!
//! Durable store content becoming RAM store content, directly through the
//! loader and through master promotion.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use mc_01_ram_store::{MemDb, Schema};
    use mc_02_persistence::{DurableStore, InMemoryDurableStore, StorageLoader};
    use mesh_node::NodeContainer;
    use shared_types::{NodeRole, Table};

    use crate::integration::{cluster, endpoint, node_config};

    fn seeded_store(pod_id: &str) -> Arc<InMemoryDurableStore> {
        let store = Arc::new(InMemoryDurableStore::new_master(pod_id));
        store
            .with_tx_batch(&mut |tx| {
                tx.insert(&cluster("c-1", "payments"))?;
                tx.insert(&endpoint("e-1", "c-1", 8080))?;
                tx.insert(&endpoint("e-2", "c-1", 8081))
            })
            .unwrap();
        store
    }

    #[test]
    fn test_clear_and_load_makes_endpoints_queryable_by_cluster() {
        let store = seeded_store("pod-a");
        let db = Arc::new(MemDb::new(Schema::mesh()).unwrap());
        {
            let mut txn = db.begin(true);
            txn.insert(cluster("stale", "gone")).unwrap();
            txn.commit().unwrap();
        }

        let loaded = StorageLoader::new(Arc::clone(&db))
            .clear_and_load(store.as_ref())
            .unwrap();
        assert_eq!(loaded, 3);

        let txn = db.begin(false);
        assert!(txn.get_by_id(Table::Clusters, "stale").unwrap().is_none());
        assert!(txn.get_by_id(Table::Clusters, "c-1").unwrap().is_some());
        let mut ids: Vec<String> = txn
            .get(Table::Endpoints, "cluster_id", &["c-1"])
            .unwrap()
            .iter()
            .map(|row| row.id().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["e-1", "e-2"]);
    }

    #[test]
    fn test_load_layers_durable_rows_over_ram_content() {
        let store = seeded_store("pod-a");
        let db = Arc::new(MemDb::new(Schema::mesh()).unwrap());
        {
            let mut txn = db.begin(true);
            txn.insert(cluster("c-1", "stale-name")).unwrap();
            txn.insert(cluster("c-2", "orders")).unwrap();
            txn.commit().unwrap();
        }

        let loaded = StorageLoader::new(Arc::clone(&db))
            .load(store.as_ref())
            .unwrap();
        assert_eq!(loaded, 3);

        let txn = db.begin(false);
        assert_eq!(
            txn.get_by_id(Table::Clusters, "c-1").unwrap(),
            Some(cluster("c-1", "payments"))
        );
        assert!(txn.get_by_id(Table::Clusters, "c-2").unwrap().is_some());
        let endpoints = txn.get(Table::Endpoints, "cluster_id", &["c-1"]).unwrap();
        assert_eq!(endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_promoted_node_serves_durable_content() {
        let store: Arc<dyn DurableStore> = seeded_store("pod-a");
        let node =
            NodeContainer::with_store(node_config("pod-a", NodeRole::Master, None), store).unwrap();
        node.start().await.unwrap();

        assert_eq!(node.db().len(Table::Clusters), 1);
        assert_eq!(node.db().len(Table::Endpoints), 2);
        node.shutdown().await;
    }
}
