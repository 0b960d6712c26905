//! # Change Records
//!
//! Row-level changes emitted by a RAM-store commit. The same [`ChangeSet`]
//! feeds the durable flush and the network publish, so its record order is
//! the transaction's operation order and is never re-sorted here.

use serde::{Deserialize, Serialize};

use crate::entities::{Entity, Table};

/// One row-level change.
///
/// `before` is `None` for inserts, `after` is `None` for deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: Table,
    pub before: Option<Entity>,
    pub after: Option<Entity>,
}

/// Classification of a [`ChangeRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeRecord {
    #[must_use]
    pub fn insert(after: Entity) -> Self {
        Self {
            table: after.table(),
            before: None,
            after: Some(after),
        }
    }

    #[must_use]
    pub fn update(before: Entity, after: Entity) -> Self {
        Self {
            table: after.table(),
            before: Some(before),
            after: Some(after),
        }
    }

    #[must_use]
    pub fn delete(before: Entity) -> Self {
        Self {
            table: before.table(),
            before: Some(before),
            after: None,
        }
    }

    /// Kind of change, or `None` for a record with neither side set.
    #[must_use]
    pub fn kind(&self) -> Option<ChangeKind> {
        match (&self.before, &self.after) {
            (None, Some(_)) => Some(ChangeKind::Insert),
            (Some(_), Some(_)) => Some(ChangeKind::Update),
            (Some(_), None) => Some(ChangeKind::Delete),
            (None, None) => None,
        }
    }

    /// Primary key of the affected row.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.after
            .as_ref()
            .or(self.before.as_ref())
            .map(Entity::id)
    }
}

/// Ordered changes of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    records: Vec<ChangeRecord>,
}

impl ChangeSet {
    #[must_use]
    pub fn new(records: Vec<ChangeRecord>) -> Self {
        Self { records }
    }

    #[must_use]
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    #[must_use]
    pub fn into_records(self) -> Vec<ChangeRecord> {
        self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Builds a change set that inserts every given row, in the given order.
    ///
    /// Used for full reloads, where the receiver replaces its state with
    /// the carried rows.
    #[must_use]
    pub fn from_rows(rows: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            records: rows.into_iter().map(ChangeRecord::insert).collect(),
        }
    }
}

impl FromIterator<ChangeRecord> for ChangeSet {
    fn from_iter<T: IntoIterator<Item = ChangeRecord>>(iter: T) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Cluster;

    fn cluster(name: &str) -> Entity {
        Entity::Cluster(Cluster {
            id: "c-1".into(),
            name: name.into(),
            lb_policy: Default::default(),
            connect_timeout_ms: 250,
        })
    }

    #[test]
    fn test_change_kinds() {
        assert_eq!(
            ChangeRecord::insert(cluster("a")).kind(),
            Some(ChangeKind::Insert)
        );
        assert_eq!(
            ChangeRecord::update(cluster("a"), cluster("b")).kind(),
            Some(ChangeKind::Update)
        );
        assert_eq!(
            ChangeRecord::delete(cluster("a")).kind(),
            Some(ChangeKind::Delete)
        );
    }

    #[test]
    fn test_change_set_keeps_order() {
        let set: ChangeSet = vec![
            ChangeRecord::insert(cluster("a")),
            ChangeRecord::delete(cluster("a")),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert_eq!(set.records()[0].kind(), Some(ChangeKind::Insert));
        assert_eq!(set.records()[1].kind(), Some(ChangeKind::Delete));
    }

    #[test]
    fn test_change_set_bincode() {
        let set = ChangeSet::from_rows(vec![cluster("a")]);
        let bytes = bincode::serialize(&set).unwrap();
        let decoded: ChangeSet = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, set);
        assert_eq!(decoded.records()[0].id(), Some("c-1"));
    }
}
