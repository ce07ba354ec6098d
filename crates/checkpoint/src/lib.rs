//! Checkpoint store implementations for loopgate.

pub mod file_store;
pub mod in_memory;

pub use file_store::FileCheckpointStore;
pub use in_memory::InMemoryCheckpointStore;
