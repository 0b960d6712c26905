//! # Persistence Errors

use mc_01_ram_store::StoreError;
use thiserror::Error;

/// Errors raised while flushing to or loading from the durable store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// This node is no longer the master; the flush was rolled back.
    ///
    /// Not retryable for the same write. Callers surface it to clients as
    /// "retry later" so the write lands on the new master.
    #[error("Stale master: this node is no longer allowed to write")]
    StaleMaster,

    /// Any other failure of the durable backend.
    #[error("Durable {operation} failed: {message}")]
    DurableOperation { operation: String, message: String },

    /// The RAM store rejected a load.
    #[error("RAM store error: {0}")]
    Store(#[from] StoreError),
}

impl PersistenceError {
    /// Wraps a backend failure.
    pub fn durable(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::DurableOperation {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// True if the client should retry against the current master.
    #[must_use]
    pub fn is_retry_later(&self) -> bool {
        matches!(self, Self::StaleMaster)
    }
}
