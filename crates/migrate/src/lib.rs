//! Migrate crate - resumable mailbox to group archive migration
//!
//! This crate provides:
//! - Domain models (jobs, checkpoints, transfer units)
//! - Checkpoint storage with crash-safe saves
//! - A rate-limited retry executor with exponential backoff
//! - The per-account migration engine and the batch orchestrator
//! - Gmail and Groups Migration API clients with OAuth authentication
//! - Typed YAML settings and migration reports
//!
//! The engine only depends on the traits in [`providers`], so every remote
//! collaborator can be replaced by the in-memory implementations in
//! [`providers::memory`].

pub mod engine;
pub mod error;
pub mod google;
pub mod models;
pub mod providers;
pub mod report;
pub mod retry;
pub mod settings;
pub mod storage;
pub mod throttle;

pub use engine::{
    AccountOutcome, AccountRun, BatchOrchestrator, BatchResult, Collaborators, EngineState,
    MessageFailure, MigrationEngine, RunStats,
};
pub use error::{AuthError, ConfigError, FailureClass, MigrationError, ProviderError};
pub use google::{ClientSecrets, GmailClient, GroupsArchiveClient, OAuthCredentialProvider};
pub use models::{
    AccountMigrationJob, CheckpointRecord, MessageId, MessageTransferUnit, OversizedPolicy,
};
pub use providers::{
    ArchiveProvider, CredentialContext, CredentialProvider, CredentialRef, ScopeSet,
    SourceProvider,
};
pub use report::{
    AccountReport, BatchReport, JsonReportSink, LogReportSink, ReportSink, account_report,
    batch_report,
};
pub use retry::{RetryExecutor, RetryPolicy, RetryStats};
pub use settings::{AccountSettings, BatchSettings, RunOverrides, RuntimeOptions, SettingsFile};
pub use storage::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use throttle::{CancelToken, RecordingSleeper, Sleeper, ThreadSleeper};
