//! Row storage and index maintenance for a single table.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use shared_types::{Entity, EntityId, Table};

use crate::errors::StoreError;
use crate::schema::{IndexSchema, TableSchema};

pub(crate) type IndexKey = Vec<String>;

/// Rows of one table plus one ordered map per declared index.
#[derive(Debug, Clone, Default)]
pub(crate) struct TableData {
    rows: BTreeMap<EntityId, Entity>,
    indexes: HashMap<&'static str, BTreeMap<IndexKey, BTreeSet<EntityId>>>,
}

impl TableData {
    pub(crate) fn new(schema: &TableSchema) -> Self {
        Self {
            rows: BTreeMap::new(),
            indexes: schema
                .indexes
                .iter()
                .map(|i| (i.name, BTreeMap::new()))
                .collect(),
        }
    }

    pub(crate) fn get(&self, id: &str) -> Option<&Entity> {
        self.rows.get(id)
    }

    pub(crate) fn rows(&self) -> impl Iterator<Item = &Entity> {
        self.rows.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.len()
    }

    /// Ids of rows whose index key starts with `prefix`, in key order.
    pub(crate) fn lookup(&self, index: &str, prefix: &[&str]) -> Vec<EntityId> {
        let Some(map) = self.indexes.get(index) else {
            return Vec::new();
        };
        let start: IndexKey = prefix.iter().map(|s| (*s).to_string()).collect();
        map.range(start..)
            .take_while(|(key, _)| {
                key.len() >= prefix.len() && key.iter().zip(prefix).all(|(k, p)| k == p)
            })
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect()
    }

    /// Inserts or replaces a row, returning the replaced row.
    ///
    /// Unique indexes are checked before anything is touched, so a rejected
    /// row leaves the table unchanged.
    pub(crate) fn upsert(
        &mut self,
        schema: &TableSchema,
        row: Entity,
    ) -> Result<Option<Entity>, StoreError> {
        let id = row.id().to_string();
        let mut keys = Vec::with_capacity(schema.indexes.len());
        for idx in &schema.indexes {
            let key = index_key(schema.table, idx, &row)?;
            if idx.unique {
                if let Some(holders) = self.indexes.get(idx.name).and_then(|m| m.get(&key)) {
                    if holders.iter().any(|h| *h != id) {
                        return Err(StoreError::UniqueViolation {
                            table: schema.table,
                            index: idx.name.to_string(),
                            key,
                        });
                    }
                }
            }
            keys.push((idx.name, key));
        }

        let previous = self.remove(schema, &id);
        for (name, key) in keys {
            self.indexes
                .entry(name)
                .or_default()
                .entry(key)
                .or_default()
                .insert(id.clone());
        }
        self.rows.insert(id, row);
        Ok(previous)
    }

    /// Removes a row and all its index entries.
    pub(crate) fn remove(&mut self, schema: &TableSchema, id: &str) -> Option<Entity> {
        let row = self.rows.remove(id)?;
        for idx in &schema.indexes {
            // Rows are only stored after every key rendered, so this cannot miss.
            let Ok(key) = index_key(schema.table, idx, &row) else {
                continue;
            };
            if let Some(map) = self.indexes.get_mut(idx.name) {
                if let Some(ids) = map.get_mut(&key) {
                    ids.remove(id);
                    if ids.is_empty() {
                        map.remove(&key);
                    }
                }
            }
        }
        Some(row)
    }
}

fn index_key(table: Table, idx: &IndexSchema, row: &Entity) -> Result<IndexKey, StoreError> {
    idx.fields
        .iter()
        .map(|f| {
            row.field(f).ok_or_else(|| StoreError::MissingField {
                table,
                id: row.id().to_string(),
                field: (*f).to_string(),
            })
        })
        .collect()
}
