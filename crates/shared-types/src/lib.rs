//! # Shared Types Crate
//!
//! Domain entities and replication primitives shared by every crate in the
//! control plane.
//!
//! ## Design Principles
//!
//! - **Closed table set**: [`Table`] and [`Entity`] are sum types. Table
//!   dispatch is a `match`, resolved at compile time.
//! - **Relation order is global**: [`Table::RELATION_ORDER`] lists parents
//!   before children. Every bulk write walks it forwards for inserts and
//!   updates and backwards for deletes.
//! - **Changes come from commits only**: a [`ChangeSet`] is produced by a
//!   RAM-store transaction and is never assembled by hand in production code.

pub mod changes;
pub mod cluster;
pub mod entities;
pub mod errors;

pub use changes::{ChangeKind, ChangeRecord, ChangeSet};
pub use cluster::{NodeInfo, NodeRole};
pub use entities::{Cluster, Endpoint, Entity, EntityId, LbPolicy, Listener, Route, Table};
pub use errors::TypeError;
