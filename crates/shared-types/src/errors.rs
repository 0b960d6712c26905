//! # Error Types
//!
//! Parse errors for values crossing the config and wire boundaries.

use thiserror::Error;

/// Errors raised when decoding shared domain values from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Table name not part of the schema.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Role name not one of master/slave/standby.
    #[error("Unknown node role: {0}")]
    UnknownRole(String),
}
