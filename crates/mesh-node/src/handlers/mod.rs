//! Bus event handlers.

pub mod apply;

pub use apply::ReplicaApplier;
