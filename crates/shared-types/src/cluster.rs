//! # Cluster Roles
//!
//! The role signal supplied by the leader-election collaborator. This crate
//! never decides a role; it only carries it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::errors::TypeError;

/// Replica role in the active/standby cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// The single writer. Runs the network publisher.
    Master,
    /// Read-only mirror. Runs the network subscriber.
    Slave,
    /// Passive. No network bus, no durable writes.
    Standby,
}

impl NodeRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Slave => "slave",
            NodeRole::Standby => "standby",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(NodeRole::Master),
            "slave" => Ok(NodeRole::Slave),
            "standby" => Ok(NodeRole::Standby),
            other => Err(TypeError::UnknownRole(other.to_string())),
        }
    }
}

/// Addressing information handed over with a role change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// This node's identifier (pod name).
    pub node_id: String,
    /// Address this node's bus publisher listens on when it is master.
    pub bus_addr: SocketAddr,
    /// Address of the current master's publisher; required for slaves.
    pub master_bus_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("Master".parse::<NodeRole>().unwrap(), NodeRole::Master);
        assert_eq!("slave".parse::<NodeRole>().unwrap(), NodeRole::Slave);
        assert_eq!("STANDBY".parse::<NodeRole>().unwrap(), NodeRole::Standby);
        assert!("leader".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(NodeRole::Master.to_string(), "master");
    }
}
