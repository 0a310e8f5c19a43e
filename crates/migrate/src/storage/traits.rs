//! Storage trait definitions

use anyhow::Result;

use crate::models::CheckpointRecord;

/// Durable per-account checkpoint storage
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for an account
    ///
    /// A missing checkpoint is not an error: an empty record is returned.
    /// An unreadable or corrupt checkpoint is.
    fn load(&self, account: &str) -> Result<CheckpointRecord>;

    /// Replace the checkpoint for an account
    ///
    /// Must be atomic: after a crash, `load` returns either the previous
    /// checkpoint or this one.
    fn save(&self, account: &str, record: &CheckpointRecord) -> Result<()>;

    /// Delete the checkpoint for an account (explicit cleanup only)
    fn remove(&self, account: &str) -> Result<()>;
}
