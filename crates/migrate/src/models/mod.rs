//! Domain models for migrations

mod checkpoint;
mod job;
mod message;

pub use checkpoint::{
    CHECKPOINT_VERSION, CheckpointRecord, CheckpointTotals, CompletedScope, FailureEntry,
};
pub use job::{AccountMigrationJob, DEFAULT_MAX_MESSAGE_SIZE, OversizedPolicy};
pub use message::{MessageId, MessageTransferUnit, ThreadingHeaders};
