//! Sequential multi-account orchestration

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{info, warn};

use super::{AccountOutcome, AccountRun, Collaborators, MigrationEngine};
use crate::models::AccountMigrationJob;

/// Ordered, append-only record of every account's run
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub runs: Vec<AccountRun>,
    /// Accounts never started because the batch was interrupted
    pub not_started: Vec<String>,
    /// Set when the orchestrator is done with the batch
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, run: AccountRun) {
        self.runs.push(run);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Accounts that ended in a fatal error
    pub fn fatal_count(&self) -> usize {
        self.runs.iter().filter(|r| r.outcome.is_fatal()).count()
    }

    /// True when at least one account ran and every one of them failed
    pub fn all_failed(&self) -> bool {
        !self.runs.is_empty() && self.fatal_count() == self.runs.len()
    }

    pub fn get(&self, account: &str) -> Option<&AccountRun> {
        self.runs.iter().find(|r| r.account == account)
    }
}

/// Runs account jobs one after another
///
/// An aborted account never stops the batch. The orchestrator has no retry
/// logic of its own; that lives in the engine's executors.
pub struct BatchOrchestrator<'a> {
    deps: Collaborators<'a>,
    account_delay: Duration,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(deps: Collaborators<'a>) -> Self {
        Self {
            deps,
            account_delay: Duration::ZERO,
        }
    }

    /// Pause between two accounts
    pub fn with_account_delay(mut self, delay: Duration) -> Self {
        self.account_delay = delay;
        self
    }

    pub fn run(&self, jobs: &[AccountMigrationJob]) -> BatchResult {
        let mut result = BatchResult::new();
        info!("Starting batch migration of {} accounts", jobs.len());

        for (index, job) in jobs.iter().enumerate() {
            if self.deps.cancel.is_cancelled() {
                warn!(
                    "Interrupted; {} accounts not started",
                    jobs.len() - index
                );
                result
                    .not_started
                    .extend(jobs[index..].iter().map(|j| j.account.clone()));
                break;
            }

            info!("[{}/{}] {}", index + 1, jobs.len(), job.account);
            let run = MigrationEngine::new(job, &self.deps).run();
            if let AccountOutcome::FatalError { message, .. } = &run.outcome {
                warn!("{} failed, continuing with next account: {}", job.account, message);
            }
            result.push(run);

            if index + 1 < jobs.len() && !self.account_delay.is_zero() {
                self.deps.sleeper.sleep(self.account_delay);
            }
        }

        result.finished_at = Some(Utc::now());
        info!(
            "Batch finished: {} accounts, {} failed",
            result.len(),
            result.fatal_count()
        );
        result
    }
}
