//! # Bus Events
//!
//! [`BusMessage`] is what components publish and what handlers receive.
//! [`Event`] is its wire form: a kind tag plus an encoded payload.
//!
//! | Message | Event kind | Payload |
//! |---------|------------|---------|
//! | `Snapshot` | `RawSnapshot` | raw bytes |
//! | `Change` | `Change` | one change set |
//! | `MultiNodeGroupChange` | `MultiNodeGroupChange` | list of change sets |
//! | `Reload` | `Reload` | one change set carrying full tables |
//! | `Local` | - | never leaves the process |

use serde::{Deserialize, Serialize};
use shared_types::{ChangeSet, NodeRole};

use crate::errors::BusError;

/// Well-known topics.
pub mod topics {
    /// Change notifications from RAM-store commits.
    pub const CHANGES: &str = "changes";
    /// Full state replacement after a master promotion.
    pub const FULL_RELOAD: &str = "full-reload";
    /// Node registry updates.
    pub const REGISTRY_UPDATES: &str = "registry-updates";
    /// In-process role change notices.
    pub const ROLE_CHANGES: &str = "role-changes";
}

/// Notices that only travel on the internal bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalNotice {
    RoleChanged(NodeRole),
}

/// A message published on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// Serialized full state for bootstrapping followers.
    Snapshot(Vec<u8>),
    /// Changes of one committed transaction.
    Change(ChangeSet),
    /// Changes of several transactions applied as one group.
    MultiNodeGroupChange(Vec<ChangeSet>),
    /// Complete table content; receivers replace their state with it.
    Reload(ChangeSet),
    Local(LocalNotice),
}

impl BusMessage {
    /// Short name for logs.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            BusMessage::Snapshot(_) => "snapshot",
            BusMessage::Change(_) => "change",
            BusMessage::MultiNodeGroupChange(_) => "multi_change",
            BusMessage::Reload(_) => "reload",
            BusMessage::Local(_) => "local",
        }
    }
}

/// Wire tag of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    RawSnapshot,
    Change,
    MultiNodeGroupChange,
    Reload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Payload {
    Raw(Vec<u8>),
    Changes(ChangeSet),
    MultiChanges(Vec<ChangeSet>),
}

/// Unit of wire transfer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    kind: EventKind,
    data: Vec<u8>,
}

impl Event {
    /// Encodes a message for the network.
    ///
    /// Returns `Ok(None)` for messages that have no wire form.
    pub fn encode(message: &BusMessage) -> Result<Option<Self>, BusError> {
        let (kind, payload) = match message {
            BusMessage::Snapshot(bytes) => (EventKind::RawSnapshot, Payload::Raw(bytes.clone())),
            BusMessage::Change(set) => (EventKind::Change, Payload::Changes(set.clone())),
            BusMessage::MultiNodeGroupChange(sets) => (
                EventKind::MultiNodeGroupChange,
                Payload::MultiChanges(sets.clone()),
            ),
            BusMessage::Reload(set) => (EventKind::Reload, Payload::Changes(set.clone())),
            BusMessage::Local(_) => return Ok(None),
        };
        Ok(Some(Self {
            kind,
            data: bincode::serialize(&payload)?,
        }))
    }

    /// Decodes the payload back into a message.
    pub fn decode(&self) -> Result<BusMessage, BusError> {
        let payload: Payload = bincode::deserialize(&self.data)?;
        match (self.kind, payload) {
            (EventKind::RawSnapshot, Payload::Raw(bytes)) => Ok(BusMessage::Snapshot(bytes)),
            (EventKind::Change, Payload::Changes(set)) => Ok(BusMessage::Change(set)),
            (EventKind::MultiNodeGroupChange, Payload::MultiChanges(sets)) => {
                Ok(BusMessage::MultiNodeGroupChange(sets))
            }
            (EventKind::Reload, Payload::Changes(set)) => Ok(BusMessage::Reload(set)),
            (kind, _) => Err(BusError::MalformedEvent(format!(
                "payload does not match kind {kind:?}"
            ))),
        }
    }

    #[must_use]
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Encoded payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }
}
