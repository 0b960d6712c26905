//! # Storage Loader
//!
//! Bulk-populates the RAM store from a [`RowSource`], at start-up and when
//! a node is promoted to master. Rows are inserted table by table in
//! [`Table::RELATION_ORDER`] inside a single RAM write transaction; the first
//! error aborts the transaction and leaves the store untouched.

use std::sync::Arc;

use mc_01_ram_store::{MemDb, Txn, ID_INDEX};
use shared_types::Table;
use tracing::{debug, info};

use crate::errors::PersistenceError;
use crate::ports::RowSource;

/// Loads rows into a [`MemDb`].
pub struct StorageLoader {
    db: Arc<MemDb>,
}

impl StorageLoader {
    pub fn new(db: Arc<MemDb>) -> Self {
        Self { db }
    }

    /// Inserts every row of `source` on top of the current content.
    ///
    /// Rows whose id already exists are replaced. Returns the number of rows
    /// loaded.
    pub fn load(&self, source: &dyn RowSource) -> Result<usize, PersistenceError> {
        let mut txn = self.db.begin(true);
        let loaded = insert_all(&mut txn, source)?;
        txn.commit()?;
        info!(rows = loaded, "RAM store loaded");
        Ok(loaded)
    }

    /// Replaces the whole content of the RAM store with `source`.
    ///
    /// Every table is emptied (children first) and refilled in relation
    /// order, all in one transaction.
    pub fn clear_and_load(&self, source: &dyn RowSource) -> Result<usize, PersistenceError> {
        let mut txn = self.db.begin(true);

        let mut cleared = 0;
        for table in Table::RELATION_ORDER.into_iter().rev() {
            cleared += txn.delete_all(table, ID_INDEX, &[])?;
        }

        let loaded = insert_all(&mut txn, source)?;
        txn.commit()?;
        info!(cleared, rows = loaded, "RAM store reloaded");
        Ok(loaded)
    }
}

fn insert_all(txn: &mut Txn<'_>, source: &dyn RowSource) -> Result<usize, PersistenceError> {
    let mut loaded = 0;
    for table in Table::RELATION_ORDER {
        let rows = source.rows(table)?;
        debug!(%table, rows = rows.len(), "Loading table");
        for row in rows {
            if row.table() != table {
                return Err(PersistenceError::durable(
                    "load",
                    format!("row {} of {} returned for table {table}", row.id(), row.table()),
                ));
            }
            txn.insert(row)?;
            loaded += 1;
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryDurableStore;
    use crate::ports::DurableStore;
    use mc_01_ram_store::Schema;
    use shared_types::{Cluster, Endpoint, Entity, LbPolicy};

    fn cluster(id: &str, name: &str) -> Entity {
        Entity::Cluster(Cluster {
            id: id.into(),
            name: name.into(),
            lb_policy: LbPolicy::RoundRobin,
            connect_timeout_ms: 1000,
        })
    }

    fn endpoint(id: &str, cluster_id: &str, port: u16) -> Entity {
        Entity::Endpoint(Endpoint {
            id: id.into(),
            cluster_id: cluster_id.into(),
            address: "10.3.0.4".into(),
            port,
            weight: 1,
        })
    }

    fn seeded_store() -> InMemoryDurableStore {
        let store = InMemoryDurableStore::new_master("pod-a");
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
    fn test_clear_and_load_one_cluster_two_endpoints() {
        let db = Arc::new(MemDb::new(Schema::mesh()).unwrap());
        let loader = StorageLoader::new(db.clone());

        assert_eq!(loader.clear_and_load(&seeded_store()).unwrap(), 3);

        let read = db.begin(false);
        assert!(read.get_by_id(Table::Clusters, "c-1").unwrap().is_some());
        let endpoints = read.get(Table::Endpoints, "cluster_id", &["c-1"]).unwrap();
        assert_eq!(endpoints.len(), 2);
    }

    #[test]
    fn test_clear_and_load_drops_stale_rows() {
        let db = Arc::new(MemDb::new(Schema::mesh()).unwrap());
        let mut txn = db.begin(true);
        txn.insert(cluster("c-stale", "old")).unwrap();
        txn.commit().unwrap();

        StorageLoader::new(db.clone())
            .clear_and_load(&seeded_store())
            .unwrap();

        let read = db.begin(false);
        assert!(read.get_by_id(Table::Clusters, "c-stale").unwrap().is_none());
        assert_eq!(db.len(Table::Clusters), 1);
    }

    #[test]
    fn test_load_keeps_existing_rows() {
        let db = Arc::new(MemDb::new(Schema::mesh()).unwrap());
        let mut txn = db.begin(true);
        txn.insert(cluster("c-other", "search")).unwrap();
        txn.commit().unwrap();

        StorageLoader::new(db.clone()).load(&seeded_store()).unwrap();
        assert_eq!(db.len(Table::Clusters), 2);
    }

    struct Conflicting;

    impl RowSource for Conflicting {
        fn rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError> {
            Ok(match table {
                Table::Clusters => vec![cluster("c-1", "dup"), cluster("c-2", "dup")],
                _ => Vec::new(),
            })
        }
    }

    #[test]
    fn test_failed_load_leaves_store_untouched() {
        let db = Arc::new(MemDb::new(Schema::mesh()).unwrap());
        let loader = StorageLoader::new(db.clone());
        loader.clear_and_load(&seeded_store()).unwrap();

        let err = loader.clear_and_load(&Conflicting).unwrap_err();
        assert!(matches!(err, PersistenceError::Store(_)));

        // Previous content survives the aborted reload.
        assert_eq!(db.len(Table::Clusters), 1);
        assert_eq!(db.len(Table::Endpoints), 2);
    }

    struct Misfiled;

    impl RowSource for Misfiled {
        fn rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError> {
            Ok(match table {
                Table::Listeners => vec![cluster("c-1", "wrong-table")],
                _ => Vec::new(),
            })
        }
    }

    #[test]
    fn test_row_from_wrong_table_rejected() {
        let db = Arc::new(MemDb::new(Schema::mesh()).unwrap());
        let err = StorageLoader::new(db.clone()).load(&Misfiled).unwrap_err();
        assert!(matches!(err, PersistenceError::DurableOperation { .. }));
        assert!(db.is_empty());
    }
}
