//! # Core Domain Entities
//!
//! The rows the control plane replicates. Each table maps to exactly one
//! entity struct; [`Entity`] is the tagged union used wherever a row of any
//! table can appear (change records, snapshots, durable batches).
//!
//! ## Tables
//!
//! | Table | Parent tables | Notes |
//! |-------|---------------|-------|
//! | `clusters` | - | upstream service groups |
//! | `listeners` | - | inbound ports of the proxy |
//! | `endpoints` | `clusters` | members of a cluster |
//! | `routes` | `listeners`, `clusters` | prefix → cluster bindings |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::TypeError;

/// Primary key of every row.
pub type EntityId = String;

/// Table identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    Clusters,
    Listeners,
    Endpoints,
    Routes,
}

impl Table {
    /// Foreign-key dependency order: parents before children.
    ///
    /// Inserts and updates walk this forwards, deletes walk it backwards.
    pub const RELATION_ORDER: [Table; 4] = [
        Table::Clusters,
        Table::Listeners,
        Table::Endpoints,
        Table::Routes,
    ];

    /// Stable table name used on the wire, in durable keys and in logs.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Table::Clusters => "clusters",
            Table::Listeners => "listeners",
            Table::Endpoints => "endpoints",
            Table::Routes => "routes",
        }
    }

    /// Position of this table in [`Table::RELATION_ORDER`].
    #[must_use]
    pub fn relation_rank(self) -> usize {
        match self {
            Table::Clusters => 0,
            Table::Listeners => 1,
            Table::Endpoints => 2,
            Table::Routes => 3,
        }
    }

    /// Fields [`Entity::field`] can render for rows of this table.
    #[must_use]
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            Table::Clusters => &["id", "name", "lb_policy"],
            Table::Listeners => &["id", "name", "address", "port"],
            Table::Endpoints => &["id", "cluster_id", "address", "port"],
            Table::Routes => &["id", "listener_id", "cluster_id", "prefix"],
        }
    }

    /// Tables this table references through foreign keys.
    #[must_use]
    pub fn parents(self) -> &'static [Table] {
        match self {
            Table::Clusters | Table::Listeners => &[],
            Table::Endpoints => &[Table::Clusters],
            Table::Routes => &[Table::Listeners, Table::Clusters],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Table {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::RELATION_ORDER
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| TypeError::UnknownTable(s.to_string()))
    }
}

/// Load-balancing policy of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LbPolicy {
    #[default]
    RoundRobin,
    LeastRequest,
    Random,
}

impl LbPolicy {
    fn as_str(self) -> &'static str {
        match self {
            LbPolicy::RoundRobin => "round_robin",
            LbPolicy::LeastRequest => "least_request",
            LbPolicy::Random => "random",
        }
    }
}

/// An upstream service group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: EntityId,
    pub name: String,
    pub lb_policy: LbPolicy,
    pub connect_timeout_ms: u64,
}

/// A proxy listener bound to an address and port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub id: EntityId,
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// A member of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EntityId,
    pub cluster_id: EntityId,
    pub address: String,
    pub port: u16,
    pub weight: u32,
}

/// Routes a path prefix arriving on a listener to a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: EntityId,
    pub listener_id: EntityId,
    pub cluster_id: EntityId,
    pub prefix: String,
    pub priority: u32,
}

/// A row of any table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entity {
    Cluster(Cluster),
    Listener(Listener),
    Endpoint(Endpoint),
    Route(Route),
}

impl Entity {
    /// Table this row belongs to.
    #[must_use]
    pub fn table(&self) -> Table {
        match self {
            Entity::Cluster(_) => Table::Clusters,
            Entity::Listener(_) => Table::Listeners,
            Entity::Endpoint(_) => Table::Endpoints,
            Entity::Route(_) => Table::Routes,
        }
    }

    /// Primary key.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Entity::Cluster(c) => &c.id,
            Entity::Listener(l) => &l.id,
            Entity::Endpoint(e) => &e.id,
            Entity::Route(r) => &r.id,
        }
    }

    /// Value of a named field rendered as an index key component.
    ///
    /// Returns `None` for fields the table does not have. Schema validation
    /// uses this to reject indexes over unknown fields.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<String> {
        match (self, name) {
            (_, "id") => Some(self.id().to_string()),

            (Entity::Cluster(c), "name") => Some(c.name.clone()),
            (Entity::Cluster(c), "lb_policy") => Some(c.lb_policy.as_str().to_string()),

            (Entity::Listener(l), "name") => Some(l.name.clone()),
            (Entity::Listener(l), "address") => Some(l.address.clone()),
            (Entity::Listener(l), "port") => Some(l.port.to_string()),

            (Entity::Endpoint(e), "cluster_id") => Some(e.cluster_id.clone()),
            (Entity::Endpoint(e), "address") => Some(e.address.clone()),
            (Entity::Endpoint(e), "port") => Some(e.port.to_string()),

            (Entity::Route(r), "listener_id") => Some(r.listener_id.clone()),
            (Entity::Route(r), "cluster_id") => Some(r.cluster_id.clone()),
            (Entity::Route(r), "prefix") => Some(r.prefix.clone()),

            _ => None,
        }
    }

    /// Rows this row references, as `(parent table, parent id)`.
    #[must_use]
    pub fn foreign_keys(&self) -> Vec<(Table, &str)> {
        match self {
            Entity::Cluster(_) | Entity::Listener(_) => Vec::new(),
            Entity::Endpoint(e) => vec![(Table::Clusters, e.cluster_id.as_str())],
            Entity::Route(r) => vec![
                (Table::Listeners, r.listener_id.as_str()),
                (Table::Clusters, r.cluster_id.as_str()),
            ],
        }
    }
}

impl From<Cluster> for Entity {
    fn from(value: Cluster) -> Self {
        Entity::Cluster(value)
    }
}

impl From<Listener> for Entity {
    fn from(value: Listener) -> Self {
        Entity::Listener(value)
    }
}

impl From<Endpoint> for Entity {
    fn from(value: Endpoint) -> Self {
        Entity::Endpoint(value)
    }
}

impl From<Route> for Entity {
    fn from(value: Route) -> Self {
        Entity::Route(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Entity {
        Entity::Endpoint(Endpoint {
            id: "ep-1".into(),
            cluster_id: "c-1".into(),
            address: "10.0.0.1".into(),
            port: 8080,
            weight: 1,
        })
    }

    #[test]
    fn test_relation_order_puts_parents_first() {
        for table in Table::RELATION_ORDER {
            for parent in table.parents() {
                assert!(parent.relation_rank() < table.relation_rank());
            }
        }
    }

    #[test]
    fn test_relation_rank_matches_position() {
        for (pos, table) in Table::RELATION_ORDER.iter().enumerate() {
            assert_eq!(table.relation_rank(), pos);
        }
    }

    #[test]
    fn test_table_name_roundtrip() {
        for table in Table::RELATION_ORDER {
            assert_eq!(table.name().parse::<Table>().unwrap(), table);
        }
        assert!(matches!(
            "gateways".parse::<Table>(),
            Err(TypeError::UnknownTable(_))
        ));
    }

    #[test]
    fn test_entity_fields() {
        let e = endpoint();
        assert_eq!(e.table(), Table::Endpoints);
        assert_eq!(e.id(), "ep-1");
        assert_eq!(e.field("cluster_id").as_deref(), Some("c-1"));
        assert_eq!(e.field("port").as_deref(), Some("8080"));
        assert_eq!(e.field("prefix"), None);
    }

    #[test]
    fn test_declared_fields_render() {
        let e = endpoint();
        for field in Table::Endpoints.fields() {
            assert!(e.field(field).is_some(), "field {field} not rendered");
        }
    }

    #[test]
    fn test_foreign_keys() {
        assert_eq!(endpoint().foreign_keys(), vec![(Table::Clusters, "c-1")]);

        let route = Entity::Route(Route {
            id: "r-1".into(),
            listener_id: "l-1".into(),
            cluster_id: "c-1".into(),
            prefix: "/api".into(),
            priority: 0,
        });
        assert_eq!(route.foreign_keys().len(), 2);
    }
}
