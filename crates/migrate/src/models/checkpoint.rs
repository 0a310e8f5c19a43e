//! Checkpoint record for resumable migrations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::MessageId;
use crate::error::FailureClass;

/// Schema version written into every checkpoint
pub const CHECKPOINT_VERSION: u32 = 1;

/// Why a message could not be migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub reason: String,
    pub class: FailureClass,
    pub failed_at: DateTime<Utc>,
}

/// Lifetime counters, summed over every run that saved this checkpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointTotals {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Marks a query whose every candidate was migrated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedScope {
    pub destination: String,
    pub query: String,
    /// Size of the completed set when the scope was closed
    pub total: usize,
    pub completed_at: DateTime<Utc>,
}

/// Durable per-account migration progress
///
/// Owned by the engine processing the account and saved after every batch,
/// so a crash loses at most one in-flight batch. `completed` and `failed`
/// are kept disjoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Source account this checkpoint belongs to
    pub account: String,
    #[serde(default = "current_version")]
    pub version: u32,
    /// Messages already present in the destination archive
    #[serde(default)]
    pub completed: HashSet<MessageId>,
    /// Messages whose last attempt failed
    #[serde(default)]
    pub failed: BTreeMap<MessageId, FailureEntry>,
    #[serde(default)]
    pub totals: CheckpointTotals,
    #[serde(default)]
    pub completed_scope: Option<CompletedScope>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

fn current_version() -> u32 {
    CHECKPOINT_VERSION
}

impl CheckpointRecord {
    /// An empty checkpoint for an account that was never migrated
    pub fn empty(account: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            account: account.into(),
            version: CHECKPOINT_VERSION,
            completed: HashSet::new(),
            failed: BTreeMap::new(),
            totals: CheckpointTotals::default(),
            completed_scope: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Whether the message was already transferred
    pub fn contains(&self, id: &MessageId) -> bool {
        self.completed.contains(id)
    }

    pub fn is_failed(&self, id: &MessageId) -> bool {
        self.failed.contains_key(id)
    }

    /// True if nothing was ever recorded
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Record a successful transfer
    ///
    /// A message that failed on an earlier run leaves the failed set.
    /// Returns false if the message was already completed.
    pub fn record_success(&mut self, id: MessageId) -> bool {
        if self.completed.contains(&id) {
            return false;
        }
        self.failed.remove(&id);
        self.completed.insert(id);
        self.totals.attempted += 1;
        self.totals.succeeded += 1;
        true
    }

    /// Record a failed transfer
    ///
    /// Completed messages are never demoted; returns false in that case.
    pub fn record_failure(
        &mut self,
        id: MessageId,
        reason: impl Into<String>,
        class: FailureClass,
    ) -> bool {
        if self.completed.contains(&id) {
            return false;
        }
        self.failed.insert(
            id,
            FailureEntry {
                reason: reason.into(),
                class,
                failed_at: Utc::now(),
            },
        );
        self.totals.attempted += 1;
        self.totals.failed += 1;
        true
    }

    /// Close the scope: every candidate of `query` is in the archive
    pub fn mark_scope_complete(&mut self, destination: &str, query: &str) {
        self.completed_scope = Some(CompletedScope {
            destination: destination.to_string(),
            query: query.to_string(),
            total: self.completed.len(),
            completed_at: Utc::now(),
        });
    }

    pub fn clear_scope(&mut self) {
        self.completed_scope = None;
    }

    /// Whether a run for `destination` + `query` would have nothing to do
    pub fn scope_covers(&self, destination: &str, query: &str) -> bool {
        self.failed.is_empty()
            && self
                .completed_scope
                .as_ref()
                .is_some_and(|s| s.destination == destination && s.query == query)
    }

    /// Update the last-modified timestamp
    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
