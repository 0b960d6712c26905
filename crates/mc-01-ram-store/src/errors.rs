//! # Store Errors

use shared_types::Table;
use thiserror::Error;

/// Errors raised by the RAM store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Schema failed start-up validation.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// Table not declared in the schema.
    #[error("Table {0} is not part of the schema")]
    UnknownTable(Table),

    /// Index not declared for the table.
    #[error("Index {index} not declared on table {table}")]
    UnknownIndex { table: Table, index: String },

    /// More lookup keys than the index has fields.
    #[error("Index {index} on {table} has {fields} fields, got {given} keys")]
    TooManyKeys {
        table: Table,
        index: String,
        fields: usize,
        given: usize,
    },

    /// A unique index already holds this key for another row.
    #[error("Unique index {index} on {table} already contains {key:?}")]
    UniqueViolation {
        table: Table,
        index: String,
        key: Vec<String>,
    },

    /// Row misses a field one of its table's indexes is built on.
    #[error("Row {id} of {table} has no value for indexed field {field}")]
    MissingField {
        table: Table,
        id: String,
        field: String,
    },

    /// Write attempted on a read transaction.
    #[error("Transaction is read-only")]
    ReadOnly,

    /// A previous operation failed; the transaction can only be aborted.
    #[error("Transaction failed earlier and cannot commit: {0}")]
    TransactionFailed(String),
}
