//! Single-account migration engine

use std::collections::HashSet;
use std::fs;

use anyhow::Context;
use chrono::Utc;
use log::{debug, error, info, warn};

use super::{
    AccountOutcome, AccountRun, Collaborators, EngineState, MessageFailure, MessageSearch,
    RunStats,
};
use crate::error::{FailureClass, MigrationError};
use crate::models::{AccountMigrationJob, CheckpointRecord, MessageId, OversizedPolicy};
use crate::providers::{CredentialContext, CredentialRef, ScopeSet};
use crate::retry::RetryExecutor;

/// Log a progress line every this many processed messages
const PROGRESS_EVERY: u64 = 10;

/// Migrates one account from its source mailbox into its group archive
///
/// Holds the account's checkpoint for the duration of the run and persists
/// it after every batch. Message-level failures are recorded and skipped;
/// only account-level failures end the run in [`EngineState::Aborted`].
pub struct MigrationEngine<'a> {
    job: &'a AccountMigrationJob,
    deps: Collaborators<'a>,
    read: RetryExecutor<'a>,
    write: RetryExecutor<'a>,
    checkpoint: CheckpointRecord,
    transitions: Vec<EngineState>,
    stats: RunStats,
    failures: Vec<MessageFailure>,
    resumed: bool,
    limited: bool,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(job: &'a AccountMigrationJob, deps: &Collaborators<'a>) -> Self {
        Self {
            job,
            deps: deps.clone(),
            read: RetryExecutor::new("read", job.retry.clone(), deps.sleeper)
                .with_cancel(deps.cancel.clone()),
            write: RetryExecutor::new("write", job.retry.clone(), deps.sleeper)
                .with_cancel(deps.cancel.clone()),
            checkpoint: CheckpointRecord::empty(&job.account),
            transitions: vec![EngineState::Init],
            stats: RunStats::default(),
            failures: Vec::new(),
            resumed: false,
            limited: false,
        }
    }

    fn state(&self) -> EngineState {
        self.transitions
            .last()
            .copied()
            .unwrap_or(EngineState::Init)
    }

    fn transition(&mut self, next: EngineState) {
        debug!("{}: {} -> {}", self.job.account, self.state(), next);
        self.transitions.push(next);
    }

    /// Run the account to a terminal state
    pub fn run(mut self) -> AccountRun {
        let started_at = Utc::now();
        info!(
            "Migrating {} -> {} (query: {:?}{})",
            self.job.account,
            self.job.destination,
            self.job.query,
            if self.job.dry_run { ", dry run" } else { "" }
        );

        let outcome = match self.execute() {
            Ok(outcome) => {
                self.transition(EngineState::Done);
                info!(
                    "{}: {} ({} succeeded, {} failed, {} skipped)",
                    self.job.account,
                    outcome.key(),
                    self.stats.succeeded,
                    self.stats.failed,
                    self.stats.skipped
                );
                outcome
            }
            Err(e) => {
                self.transition(EngineState::Aborted);
                error!("{}: migration aborted: {}", self.job.account, e);
                AccountOutcome::FatalError {
                    kind: e.kind().to_string(),
                    message: e.to_string(),
                }
            }
        };

        AccountRun {
            account: self.job.account.clone(),
            destination: self.job.destination.clone(),
            outcome,
            final_state: self.state(),
            transitions: self.transitions,
            stats: self.stats,
            failures: self.failures,
            resumed: self.resumed,
            dry_run: self.job.dry_run,
            limited: self.limited,
            checkpoint_completed: self.checkpoint.completed_count(),
            read_retries: self.read.stats(),
            write_retries: self.write.stats(),
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn execute(&mut self) -> Result<AccountOutcome, MigrationError> {
        let job = self.job;

        self.checkpoint = self
            .deps
            .checkpoints
            .load(&job.account)
            .map_err(|e| MigrationError::checkpoint_io(&job.account, e))?;
        self.resumed = !self.checkpoint.is_empty();

        if !job.rescan && !job.dry_run && self.checkpoint.scope_covers(&job.destination, &job.query)
        {
            info!(
                "{}: already complete ({} messages migrated)",
                job.account,
                self.checkpoint.completed_count()
            );
            return Ok(AccountOutcome::SkippedAlreadyComplete);
        }
        if self.resumed {
            info!(
                "{}: resuming with {} migrated and {} failed messages on record",
                job.account,
                self.checkpoint.completed_count(),
                self.checkpoint.failed_count()
            );
        }

        self.transition(EngineState::Authenticating);
        let (source_ctx, dest_ctx) = self.authenticate()?;

        self.transition(EngineState::Enumerating);
        let exhausted = self.transfer(&source_ctx, &dest_ctx)?;

        self.transition(EngineState::Finalizing);
        self.finalize(exhausted)
    }

    /// Acquire both credentials and check the destination is writable
    fn authenticate(&mut self) -> Result<(CredentialContext, CredentialContext), MigrationError> {
        let job = self.job;
        let credentials = self.deps.credentials;
        let archive = self.deps.archive;

        // Consent abandoned on Ctrl-C surfaces as an auth error
        let cancel = &self.deps.cancel;
        let acquire = |scopes: &ScopeSet, cached: &CredentialRef| {
            credentials.acquire(scopes, cached).map_err(|e| {
                if cancel.is_cancelled() {
                    MigrationError::Interrupted
                } else {
                    MigrationError::from(e)
                }
            })
        };
        let source_ctx = acquire(&ScopeSet::source_read(), &job.source_credentials)?;
        let dest_ctx = acquire(&ScopeSet::destination_write(), &job.destination_credentials)?;

        self.write
            .run("verify destination", || {
                archive.verify_access(&dest_ctx, &job.destination)
            })
            .map_err(|e| match e {
                MigrationError::Interrupted => e,
                e => MigrationError::DestinationUnavailable {
                    archive: job.destination.clone(),
                    reason: e.to_string(),
                },
            })?;

        Ok((source_ctx, dest_ctx))
    }

    /// Enumerate and transfer batch by batch
    ///
    /// Returns whether the query was exhausted.
    fn transfer(
        &mut self,
        source_ctx: &CredentialContext,
        dest_ctx: &CredentialContext,
    ) -> Result<bool, MigrationError> {
        let job = self.job;
        let batch_size = job.batch_size.max(1);
        let mut search = MessageSearch::new(self.deps.source, source_ctx, &job.account, &job.query);
        let mut seen: HashSet<MessageId> = HashSet::new();
        let mut processed = 0usize;

        loop {
            let room = match job.max_messages {
                Some(max) => batch_size.min(max.saturating_sub(processed)),
                None => batch_size,
            };
            if room == 0 {
                self.limited = true;
                info!("{}: message limit reached before listing", job.account);
                break;
            }

            let mut batch = Vec::with_capacity(room);
            while batch.len() < room {
                let Some(id) = search.next_id(&mut self.read)? else {
                    break;
                };
                if !seen.insert(id.clone()) {
                    continue;
                }
                self.stats.candidates += 1;
                if self.checkpoint.contains(&id) {
                    self.stats.already_migrated += 1;
                    continue;
                }
                batch.push(id);
            }

            if batch.is_empty() {
                break;
            }
            if self.state() != EngineState::Transferring {
                self.transition(EngineState::Transferring);
            }

            self.stats.batches += 1;
            debug!(
                "{}: batch {} with {} messages",
                job.account,
                self.stats.batches,
                batch.len()
            );

            for id in batch {
                if self.deps.cancel.is_cancelled() {
                    self.save_progress()?;
                    return Err(MigrationError::Interrupted);
                }
                if let Err(e) = self.transfer_one(id, source_ctx, dest_ctx) {
                    self.save_progress()?;
                    return Err(e);
                }
                processed += 1;
                if self.stats.attempted % PROGRESS_EVERY == 0 {
                    info!(
                        "{}: {} processed ({} succeeded, {} failed)",
                        job.account, self.stats.attempted, self.stats.succeeded, self.stats.failed
                    );
                }
            }

            self.save_progress()?;

            if job.limit_reached(processed) {
                self.limited = true;
                info!("{}: stopping after {} messages (limit)", job.account, processed);
                break;
            }
            if search.is_exhausted() {
                break;
            }
            if !job.batch_delay.is_zero() {
                self.deps.sleeper.sleep(job.batch_delay);
            }
            if self.deps.cancel.is_cancelled() {
                return Err(MigrationError::Interrupted);
            }
        }

        if self.state() != EngineState::Transferring {
            info!("{}: nothing to migrate", job.account);
        }
        Ok(search.is_exhausted())
    }

    /// Move one pending message
    ///
    /// Failures are recorded against the message. Only an interrupt is
    /// returned, and it leaves the message untouched for the next run.
    fn transfer_one(
        &mut self,
        id: MessageId,
        source_ctx: &CredentialContext,
        dest_ctx: &CredentialContext,
    ) -> Result<(), MigrationError> {
        let job = self.job;
        let source = self.deps.source;
        let archive = self.deps.archive;
        self.stats.attempted += 1;

        let unit = match self
            .read
            .run("fetch message", || source.fetch(source_ctx, &job.account, &id))
        {
            Ok(unit) => unit,
            Err(MigrationError::Interrupted) => return Err(MigrationError::Interrupted),
            Err(e) => {
                let class = e.failure_class();
                self.record_failure(id, e.to_string(), class);
                return Ok(());
            }
        };

        if unit.size() > job.max_message_size {
            let reason = format!(
                "message is {} bytes, limit is {}",
                unit.size(),
                job.max_message_size
            );
            match job.oversized_policy {
                OversizedPolicy::Skip => {
                    warn!("{}: skipping {}: {}", job.account, id, reason);
                    self.stats.skipped += 1;
                }
                OversizedPolicy::Fail => {
                    self.record_failure(id, reason, FailureClass::Permanent);
                }
            }
            return Ok(());
        }

        if let Some(dir) = &job.inspect_dir
            && let Err(e) = write_inspection(dir, &unit.id, &unit.raw)
        {
            warn!("{}: could not save {} for inspection: {:#}", job.account, id, e);
        }

        if job.dry_run {
            debug!(
                "{}: would migrate {} ({} bytes, subject {:?})",
                job.account,
                id,
                unit.size(),
                unit.headers.subject
            );
            self.stats.succeeded += 1;
            return Ok(());
        }

        match self
            .write
            .run("insert message", || archive.insert(dest_ctx, &job.destination, &unit))
        {
            Ok(()) => {
                self.checkpoint.record_success(id);
                self.stats.succeeded += 1;
            }
            Err(MigrationError::Interrupted) => return Err(MigrationError::Interrupted),
            Err(e) => {
                let class = e.failure_class();
                self.record_failure(id, e.to_string(), class);
            }
        }
        Ok(())
    }

    fn record_failure(&mut self, id: MessageId, reason: String, class: FailureClass) {
        warn!("{}: failed to migrate {}: {}", self.job.account, id, reason);
        self.stats.failed += 1;
        if !self.job.dry_run {
            self.checkpoint.record_failure(id.clone(), reason.clone(), class);
        }
        self.failures.push(MessageFailure { id, reason, class });
    }

    /// Persist the checkpoint; a no-op in dry runs
    fn save_progress(&mut self) -> Result<(), MigrationError> {
        if self.job.dry_run {
            return Ok(());
        }
        self.checkpoint.touch();
        self.deps
            .checkpoints
            .save(&self.job.account, &self.checkpoint)
            .map_err(|e| MigrationError::checkpoint_io(&self.job.account, e))
    }

    fn finalize(&mut self, exhausted: bool) -> Result<AccountOutcome, MigrationError> {
        let job = self.job;
        if exhausted && !self.limited && self.checkpoint.failed.is_empty() {
            self.checkpoint
                .mark_scope_complete(&job.destination, &job.query);
        } else {
            self.checkpoint.clear_scope();
        }
        self.save_progress()?;

        Ok(match self.stats.failed {
            0 => AccountOutcome::Completed,
            failed => AccountOutcome::CompletedWithFailures { failed },
        })
    }
}

/// Write a raw message to `<dir>/<id>.eml`
fn write_inspection(dir: &std::path::Path, id: &MessageId, raw: &[u8]) -> anyhow::Result<()> {
    config::ensure_dir(dir)?;
    let path = dir.join(format!("{}.eml", config::file_stem_for(id.as_str())));
    fs::write(&path, raw).with_context(|| format!("Failed to write {}", path.display()))
}
