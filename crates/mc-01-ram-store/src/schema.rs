//! # Table Schema
//!
//! Index declarations per table. The schema is checked once by
//! [`Schema::validate`] when the store is built; after that every index is
//! maintained on every write.

use std::collections::{BTreeMap, HashSet};

use shared_types::Table;

use crate::errors::StoreError;

/// Name of the primary-key index every table must declare.
pub const ID_INDEX: &str = "id";

/// One index over one or more fields of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: &'static str,
    pub fields: &'static [&'static str],
    pub unique: bool,
}

impl IndexSchema {
    #[must_use]
    pub const fn unique(name: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            name,
            fields,
            unique: true,
        }
    }

    #[must_use]
    pub const fn non_unique(name: &'static str, fields: &'static [&'static str]) -> Self {
        Self {
            name,
            fields,
            unique: false,
        }
    }
}

/// All indexes of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: Table,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// The full store schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    tables: BTreeMap<Table, TableSchema>,
}

impl Schema {
    /// Empty schema; add tables with [`Schema::with_table`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.table, table);
        self
    }

    /// Schema of the control-plane tables.
    #[must_use]
    pub fn mesh() -> Self {
        Self::new()
            .with_table(TableSchema {
                table: Table::Clusters,
                indexes: vec![
                    IndexSchema::unique(ID_INDEX, &["id"]),
                    IndexSchema::unique("name", &["name"]),
                ],
            })
            .with_table(TableSchema {
                table: Table::Listeners,
                indexes: vec![
                    IndexSchema::unique(ID_INDEX, &["id"]),
                    IndexSchema::unique("name", &["name"]),
                    IndexSchema::unique("address_port", &["address", "port"]),
                ],
            })
            .with_table(TableSchema {
                table: Table::Endpoints,
                indexes: vec![
                    IndexSchema::unique(ID_INDEX, &["id"]),
                    IndexSchema::non_unique("cluster_id", &["cluster_id"]),
                    IndexSchema::unique("cluster_address_port", &["cluster_id", "address", "port"]),
                ],
            })
            .with_table(TableSchema {
                table: Table::Routes,
                indexes: vec![
                    IndexSchema::unique(ID_INDEX, &["id"]),
                    IndexSchema::non_unique("listener_id", &["listener_id"]),
                    IndexSchema::non_unique("cluster_id", &["cluster_id"]),
                    IndexSchema::unique("listener_prefix", &["listener_id", "prefix"]),
                ],
            })
    }

    #[must_use]
    pub fn table(&self, table: Table) -> Option<&TableSchema> {
        self.tables.get(&table)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    /// Checks the schema is usable.
    ///
    /// Every table of [`Table::RELATION_ORDER`] must be declared with a
    /// unique single-field `id` index, index names must be distinct per
    /// table, and every indexed field must exist on the table.
    pub fn validate(&self) -> Result<(), StoreError> {
        for table in Table::RELATION_ORDER {
            let Some(ts) = self.tables.get(&table) else {
                return Err(StoreError::InvalidSchema(format!(
                    "table {table} is not declared"
                )));
            };

            match ts.index(ID_INDEX) {
                Some(idx) if idx.unique && idx.fields == ["id"] => {}
                _ => {
                    return Err(StoreError::InvalidSchema(format!(
                        "table {table} needs a unique index \"{ID_INDEX}\" on field \"id\""
                    )))
                }
            }

            let mut seen = HashSet::new();
            for idx in &ts.indexes {
                if !seen.insert(idx.name) {
                    return Err(StoreError::InvalidSchema(format!(
                        "table {table} declares index {} twice",
                        idx.name
                    )));
                }
                if idx.fields.is_empty() {
                    return Err(StoreError::InvalidSchema(format!(
                        "index {} on {table} has no fields",
                        idx.name
                    )));
                }
                if let Some(field) = idx.fields.iter().find(|f| !table.fields().contains(*f)) {
                    return Err(StoreError::InvalidSchema(format!(
                        "index {} on {table} uses unknown field {field}",
                        idx.name
                    )));
                }
            }
        }
        Ok(())
    }
}
