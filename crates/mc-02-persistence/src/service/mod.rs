//! Flush and load services.

pub mod flusher;
pub mod loader;

pub use flusher::{plan, FlushOp, FlushOutcome, Flusher};
pub use loader::StorageLoader;
