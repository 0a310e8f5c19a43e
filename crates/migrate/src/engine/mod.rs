//! Migration engine
//!
//! - [`MigrationEngine`] drives one account through
//!   `INIT → AUTHENTICATING → ENUMERATING → TRANSFERRING → FINALIZING → {DONE, ABORTED}`
//! - [`BatchOrchestrator`] runs a list of accounts sequentially and collects
//!   their outcomes into a [`BatchResult`]

mod account;
mod batch;
mod enumerate;

pub use account::MigrationEngine;
pub use batch::{BatchOrchestrator, BatchResult};
pub use enumerate::MessageSearch;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FailureClass;
use crate::models::MessageId;
use crate::providers::{ArchiveProvider, CredentialProvider, SourceProvider};
use crate::retry::RetryStats;
use crate::storage::CheckpointStore;
use crate::throttle::{CancelToken, Sleeper};

/// Engine state for one account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Init,
    Authenticating,
    Enumerating,
    Transferring,
    Finalizing,
    Done,
    Aborted,
}

impl EngineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Authenticating => "AUTHENTICATING",
            Self::Enumerating => "ENUMERATING",
            Self::Transferring => "TRANSFERRING",
            Self::Finalizing => "FINALIZING",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// How an account's run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccountOutcome {
    /// Every processed message reached the archive
    Completed,
    /// The run finished but some messages could not be migrated
    CompletedWithFailures { failed: u64 },
    /// The checkpoint already covered the whole query; nothing was done
    SkippedAlreadyComplete,
    /// The account was aborted
    FatalError { kind: String, message: String },
}

impl AccountOutcome {
    /// Stable identifier used in reports
    pub fn key(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithFailures { .. } => "completed_with_failures",
            Self::SkippedAlreadyComplete => "skipped_already_complete",
            Self::FatalError { .. } => "fatal_error",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalError { .. })
    }
}

/// Per-run message counters
///
/// Independent from the checkpoint's lifetime totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Distinct ids produced by enumeration
    pub candidates: u64,
    /// Candidates skipped because the checkpoint already had them
    pub already_migrated: u64,
    /// Messages this run tried to transfer
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Messages left out by the oversized policy
    pub skipped: u64,
    /// Batches processed (and checkpointed, unless dry run)
    pub batches: u64,
}

/// A message this run could not migrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFailure {
    pub id: MessageId,
    pub reason: String,
    pub class: FailureClass,
}

/// Everything known about one account's run once it reached a terminal state
#[derive(Debug, Clone)]
pub struct AccountRun {
    pub account: String,
    pub destination: String,
    pub outcome: AccountOutcome,
    pub final_state: EngineState,
    /// Every state visited, in order, starting with INIT
    pub transitions: Vec<EngineState>,
    pub stats: RunStats,
    pub failures: Vec<MessageFailure>,
    /// The checkpoint held progress from an earlier run
    pub resumed: bool,
    pub dry_run: bool,
    /// Stopped early because of the message limit
    pub limited: bool,
    /// Size of the checkpoint's completed set at the end of the run
    pub checkpoint_completed: usize,
    pub read_retries: RetryStats,
    pub write_retries: RetryStats,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AccountRun {
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }
}

/// The collaborators an engine run needs
#[derive(Clone)]
pub struct Collaborators<'a> {
    pub credentials: &'a dyn CredentialProvider,
    pub source: &'a dyn SourceProvider,
    pub archive: &'a dyn ArchiveProvider,
    pub checkpoints: &'a dyn CheckpointStore,
    pub sleeper: &'a dyn Sleeper,
    pub cancel: CancelToken,
}
