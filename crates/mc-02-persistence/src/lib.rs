//! # Persistence (mc-02)
//!
//! Moves state between the RAM store and the durable store.
//!
//! - [`Flusher`] writes a committed [`ChangeSet`] to the durable store in one
//!   fenced transaction.
//! - [`StorageLoader`] fills the RAM store from the durable store (or any
//!   other [`RowSource`]).
//!
//! ## Invariants
//!
//! | ID | Invariant | Description |
//! |----|-----------|-------------|
//! | 1 | Fencing | A flush commits only while the store names this pod master |
//! | 2 | Atomicity | A failed flush leaves no durable trace |
//! | 3 | Relation order | Parents are written before children, deleted after them |
//! | 4 | Standby silence | Standby nodes never write |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  ChangeSet   ┌─────────┐  DurableTx   ┌──────────────┐
//! │ RAM txn      │ ───────────→ │ Flusher │ ───────────→ │ DurableStore │
//! └──────────────┘              └─────────┘              └──────┬───────┘
//!        ↑                                                      │ RowSource
//!        └─────────────────── StorageLoader ←───────────────────┘
//! ```
//!
//! [`ChangeSet`]: shared_types::ChangeSet

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod errors;
pub mod ports;
pub mod service;

pub use adapters::InMemoryDurableStore;
pub use errors::PersistenceError;
pub use ports::{DurableStore, DurableTx, RowSource, TxBody};
pub use service::{FlushOp, FlushOutcome, Flusher, StorageLoader};
