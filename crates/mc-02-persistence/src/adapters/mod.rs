//! Adapters implementing the outbound ports.

mod memory;

pub use memory::InMemoryDurableStore;
