//! # RAM Store (mc-01)
//!
//! The in-process table store every replica serves reads from. The master
//! writes here first; followers converge to it by applying replicated
//! change sets.
//!
//! ## Guarantees
//!
//! | ID | Guarantee | Description |
//! |----|-----------|-------------|
//! | 1 | Snapshot isolation | A transaction reads the state as of its begin |
//! | 2 | Serialized writers | At most one write transaction is open |
//! | 3 | All-or-nothing commit | A failed operation poisons the transaction |
//! | 4 | Index consistency | Every index reflects every row after commit |
//! | 5 | Change capture | Commit yields the ordered [`ChangeSet`] of the write |
//!
//! ## Usage
//!
//! ```ignore
//! use mc_01_ram_store::{MemDb, Schema};
//!
//! let db = MemDb::new(Schema::mesh())?;
//!
//! let mut txn = db.begin(true);
//! txn.insert(cluster.into())?;
//! let changes = txn.commit()?;
//!
//! let read = db.begin(false);
//! let found = read.first(Table::Clusters, "name", &["backend"])?;
//! ```
//!
//! [`ChangeSet`]: shared_types::ChangeSet

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod db;
pub mod errors;
pub mod schema;
mod table;
pub mod txn;

pub use db::MemDb;
pub use errors::StoreError;
pub use schema::{IndexSchema, Schema, TableSchema, ID_INDEX};
pub use txn::Txn;
