//! # RocksDB Durable Store
//!
//! Production implementation of the durable-store port.
//!
//! ## Layout
//!
//! - One column family per table, rows as bincode values keyed by id
//! - `meta` column family holding the master lease under `master`
//!
//! ## Transactions
//!
//! Writes of one `with_tx_batch` call are staged in a `WriteBatch` plus an
//! overlay used for reads inside the transaction, and written atomically at
//! the end. Transactions are serialized so that foreign-key checks see a
//! stable view.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use mc_02_persistence::{DurableStore, DurableTx, PersistenceError, RowSource, TxBody};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use shared_types::{Entity, Table};
use tracing::{debug, info};

/// Column family of the master lease.
pub const CF_META: &str = "meta";
const MASTER_KEY: &[u8] = b"master";

/// RocksDB configuration.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Path to the database directory
    pub path: PathBuf,
    /// Write buffer size in bytes (default: 16MB)
    pub write_buffer_size: usize,
    /// fsync every committed batch (default: true)
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/rocksdb"),
            write_buffer_size: 16 * 1024 * 1024,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Small buffers, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_buffer_size: 1024 * 1024,
            sync_writes: false,
        }
    }
}

fn storage_error(operation: &str, e: impl ToString) -> PersistenceError {
    PersistenceError::durable(operation, e)
}

/// Durable store backed by RocksDB.
pub struct RocksDbDurableStore {
    db: DB,
    pod_id: String,
    config: RocksDbConfig,
    tx_lock: Mutex<()>,
}

impl RocksDbDurableStore {
    /// Opens or creates the database as seen by pod `pod_id`.
    pub fn open(config: RocksDbConfig, pod_id: impl Into<String>) -> Result<Self, PersistenceError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = Table::RELATION_ORDER
            .iter()
            .map(|t| t.name())
            .chain(std::iter::once(CF_META))
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, cf_descriptors)
            .map_err(|e| storage_error("open", e))?;
        info!(path = %config.path.display(), "RocksDB durable store opened");

        Ok(Self {
            db,
            pod_id: pod_id.into(),
            config,
            tx_lock: Mutex::new(()),
        })
    }

    pub fn pod_id(&self) -> &str {
        &self.pod_id
    }

    /// Records this pod as lease holder.
    pub fn claim_master(&self) -> Result<(), PersistenceError> {
        let pod = self.pod_id.clone();
        self.set_master(Some(&pod))
    }

    /// Records which pod holds the master lease.
    pub fn set_master(&self, pod_id: Option<&str>) -> Result<(), PersistenceError> {
        let _guard = self.tx_lock.lock();
        let cf = self.cf(CF_META)?;
        let result = match pod_id {
            Some(pod) => self.db.put_cf_opt(cf, MASTER_KEY, pod.as_bytes(), &self.write_options()),
            None => self.db.delete_cf_opt(cf, MASTER_KEY, &self.write_options()),
        };
        result.map_err(|e| storage_error("set_master", e))
    }

    /// Pod currently holding the master lease.
    pub fn master(&self) -> Result<Option<String>, PersistenceError> {
        let value = self
            .db
            .get_cf(self.cf(CF_META)?, MASTER_KEY)
            .map_err(|e| storage_error("read_master", e))?;
        Ok(value.map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, PersistenceError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| storage_error("column_family", format!("missing column family {name}")))
    }

    fn write_options(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn read_row(&self, table: Table, id: &str) -> Result<Option<Entity>, PersistenceError> {
        self.db
            .get_cf(self.cf(table.name())?, id.as_bytes())
            .map_err(|e| storage_error("get", e))?
            .map(|bytes| decode_row(&bytes))
            .transpose()
    }
}

fn decode_row(bytes: &[u8]) -> Result<Entity, PersistenceError> {
    bincode::deserialize(bytes).map_err(|e| storage_error("decode", e))
}

impl RowSource for RocksDbDurableStore {
    fn rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError> {
        let cf = self.cf(table.name())?;
        let mut rows = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| storage_error("scan", e))?;
            rows.push(decode_row(&value)?);
        }
        Ok(rows)
    }
}

impl DurableStore for RocksDbDurableStore {
    fn with_tx_batch(&self, body: &mut TxBody<'_>) -> Result<(), PersistenceError> {
        let _guard = self.tx_lock.lock();
        let mut tx = RocksTx {
            store: self,
            batch: WriteBatch::default(),
            overlay: HashMap::new(),
        };
        body(&mut tx)?;

        let ops = tx.batch.len();
        self.db
            .write_opt(tx.batch, &self.write_options())
            .map_err(|e| storage_error("commit", e))?;
        debug!(ops, "Durable batch committed");
        Ok(())
    }
}

struct RocksTx<'a> {
    store: &'a RocksDbDurableStore,
    batch: WriteBatch,
    /// Rows written by this transaction; `None` marks a delete.
    overlay: HashMap<(Table, String), Option<Entity>>,
}

impl RocksTx<'_> {
    fn get(&self, table: Table, id: &str) -> Result<Option<Entity>, PersistenceError> {
        match self.overlay.get(&(table, id.to_string())) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.read_row(table, id),
        }
    }

    /// Committed rows of `table` with this transaction's writes applied.
    fn table_rows(&self, table: Table) -> Result<Vec<Entity>, PersistenceError> {
        let mut rows: BTreeMap<String, Entity> = self
            .store
            .rows(table)?
            .into_iter()
            .map(|row| (row.id().to_string(), row))
            .collect();
        for ((t, id), staged) in &self.overlay {
            if *t != table {
                continue;
            }
            match staged {
                Some(row) => rows.insert(id.clone(), row.clone()),
                None => rows.remove(id),
            };
        }
        Ok(rows.into_values().collect())
    }

    fn check_parents(&self, operation: &str, row: &Entity) -> Result<(), PersistenceError> {
        for (parent, parent_id) in row.foreign_keys() {
            if self.get(parent, parent_id)?.is_none() {
                return Err(storage_error(
                    operation,
                    format!(
                        "{} {} references missing {parent} {parent_id}",
                        row.table(),
                        row.id()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn put(&mut self, row: &Entity) -> Result<(), PersistenceError> {
        let bytes = bincode::serialize(row).map_err(|e| storage_error("encode", e))?;
        let cf = self.store.cf(row.table().name())?;
        self.batch.put_cf(cf, row.id().as_bytes(), bytes);
        self.overlay
            .insert((row.table(), row.id().to_string()), Some(row.clone()));
        Ok(())
    }
}

impl DurableTx for RocksTx<'_> {
    fn insert(&mut self, row: &Entity) -> Result<(), PersistenceError> {
        if self.get(row.table(), row.id())?.is_some() {
            return Err(storage_error(
                "insert",
                format!("duplicate key {} in {}", row.id(), row.table()),
            ));
        }
        self.check_parents("insert", row)?;
        self.put(row)
    }

    fn update(&mut self, row: &Entity) -> Result<(), PersistenceError> {
        if self.get(row.table(), row.id())?.is_none() {
            return Err(storage_error(
                "update",
                format!("no row {} in {}", row.id(), row.table()),
            ));
        }
        self.check_parents("update", row)?;
        self.put(row)
    }

    fn delete(&mut self, table: Table, id: &str) -> Result<(), PersistenceError> {
        for child in Table::RELATION_ORDER
            .into_iter()
            .filter(|child| child.parents().contains(&table))
        {
            let referencing = self.table_rows(child)?.into_iter().find(|row| {
                row.foreign_keys()
                    .iter()
                    .any(|(t, fk)| *t == table && *fk == id)
            });
            if let Some(row) = referencing {
                return Err(storage_error(
                    "delete",
                    format!("{table} {id} is still referenced by {child} {}", row.id()),
                ));
            }
        }

        let cf = self.store.cf(table.name())?;
        self.batch.delete_cf(cf, id.as_bytes());
        self.overlay.insert((table, id.to_string()), None);
        Ok(())
    }

    fn is_current_pod_defined_as_master(&mut self) -> Result<bool, PersistenceError> {
        Ok(self.store.master()?.as_deref() == Some(self.store.pod_id.as_str()))
    }
}
