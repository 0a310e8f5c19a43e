//! Checkpoint storage
//!
//! The trait-based design allows swapping between the file-backed store used
//! in production and the in-memory store used by tests.

mod file;
mod memory;
mod traits;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use traits::CheckpointStore;
