//! Migration reports
//!
//! [`account_report`] and [`batch_report`] are pure functions of the engine's
//! results. Persisting them is a [`ReportSink`]'s job; a sink failure is
//! logged and never changes the outcome of a migration.

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::engine::{AccountOutcome, AccountRun, BatchResult, EngineState, MessageFailure};

/// Summary of one account's run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountReport {
    pub migration_date: DateTime<Utc>,
    pub gmail_account: String,
    pub group_email: String,
    /// Stable outcome key (`completed`, `fatal_error`, ...)
    pub outcome: String,
    /// Human-readable status line
    pub status: String,
    pub final_state: EngineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub resumed: bool,
    pub dry_run: bool,
    pub limited: bool,
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub already_migrated: u64,
    /// Messages in the archive according to the checkpoint
    pub total_migrated: usize,
    pub failed_messages: Vec<MessageFailure>,
    pub retries: u64,
    pub retry_wait_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}

impl AccountReport {
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// One line of the batch summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryEntry {
    pub gmail_account: String,
    pub group_email: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub successful: Vec<SummaryEntry>,
    pub failed: Vec<SummaryEntry>,
}

/// Aggregate over every account of a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_migration_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_config_file: Option<String>,
    pub total_users: usize,
    pub successful_users: usize,
    pub failed_users: usize,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub not_started: Vec<String>,
    pub total_emails_processed: u64,
    pub total_emails_failed: u64,
    pub total_emails_skipped: u64,
    pub user_results: Vec<AccountReport>,
    pub summary: BatchSummary,
}

/// User-facing status line for a run
pub fn status_line(run: &AccountRun) -> String {
    let mut status = match &run.outcome {
        AccountOutcome::SkippedAlreadyComplete => "already complete".to_string(),
        AccountOutcome::FatalError { message, .. } => format!("failed: {}", message),
        AccountOutcome::CompletedWithFailures { failed } => format!(
            "completed with {} unrecoverable message failure{}",
            failed,
            if *failed == 1 { "" } else { "s" }
        ),
        AccountOutcome::Completed if run.limited => "partially migrated".to_string(),
        AccountOutcome::Completed if run.resumed => "resumed and completed".to_string(),
        AccountOutcome::Completed => "fully migrated".to_string(),
    };
    if run.limited {
        status.push_str(" (message limit reached)");
    }
    if run.dry_run {
        status.push_str(" (dry run)");
    }
    status
}

pub fn account_report(run: &AccountRun) -> AccountReport {
    let error = match &run.outcome {
        AccountOutcome::FatalError { message, .. } => Some(message.clone()),
        _ => None,
    };
    AccountReport {
        migration_date: run.finished_at,
        gmail_account: run.account.clone(),
        group_email: run.destination.clone(),
        outcome: run.outcome.key().to_string(),
        status: status_line(run),
        final_state: run.final_state,
        error,
        resumed: run.resumed,
        dry_run: run.dry_run,
        limited: run.limited,
        attempted: run.stats.attempted,
        succeeded: run.stats.succeeded,
        failed: run.stats.failed,
        skipped: run.stats.skipped,
        already_migrated: run.stats.already_migrated,
        total_migrated: run.checkpoint_completed,
        failed_messages: run.failures.clone(),
        retries: run.read_retries.retries + run.write_retries.retries,
        retry_wait_ms: (run.read_retries.total_wait + run.write_retries.total_wait).as_millis()
            as u64,
        started_at: run.started_at,
        finished_at: run.finished_at,
        elapsed_ms: run.elapsed_ms(),
    }
}

pub fn batch_report(result: &BatchResult, config_file: Option<&Path>) -> BatchReport {
    let user_results: Vec<AccountReport> = result.runs.iter().map(account_report).collect();

    let mut summary = BatchSummary::default();
    for report in &user_results {
        let entry = SummaryEntry {
            gmail_account: report.gmail_account.clone(),
            group_email: report.group_email.clone(),
            status: report.status.clone(),
        };
        if report.is_failure() {
            summary.failed.push(entry);
        } else {
            summary.successful.push(entry);
        }
    }

    BatchReport {
        batch_migration_date: result
            .finished_at
            .or_else(|| result.runs.iter().map(|r| r.finished_at).max())
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        batch_config_file: config_file.map(|p| p.display().to_string()),
        total_users: user_results.len(),
        successful_users: summary.successful.len(),
        failed_users: summary.failed.len(),
        not_started: result.not_started.clone(),
        total_emails_processed: user_results.iter().map(|r| r.succeeded).sum(),
        total_emails_failed: user_results.iter().map(|r| r.failed).sum(),
        total_emails_skipped: user_results.iter().map(|r| r.skipped).sum(),
        user_results,
        summary,
    }
}

/// Destination for finished reports
pub trait ReportSink {
    fn persist_account(&self, report: &AccountReport) -> Result<()>;
    fn persist_batch(&self, report: &BatchReport) -> Result<()>;
}

/// Hand an account report to every sink, logging failures
pub fn deliver_account(sinks: &[&dyn ReportSink], report: &AccountReport) {
    for sink in sinks {
        if let Err(e) = sink.persist_account(report) {
            warn!(
                "Failed to persist report for {}: {:#}",
                report.gmail_account, e
            );
        }
    }
}

/// Hand a batch report to every sink, logging failures
pub fn deliver_batch(sinks: &[&dyn ReportSink], report: &BatchReport) {
    for sink in sinks {
        if let Err(e) = sink.persist_batch(report) {
            warn!("Failed to persist batch report: {:#}", e);
        }
    }
}

/// Writes pretty JSON reports into a directory
///
/// ```text
/// reports/
///   alice_at_example.com_migration_report.json
///   batch_migration_report.json
/// ```
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn account_path(&self, account: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_migration_report.json",
            config::file_stem_for(account)
        ))
    }

    pub fn batch_path(&self) -> PathBuf {
        self.dir.join("batch_migration_report.json")
    }
}

impl ReportSink for JsonReportSink {
    fn persist_account(&self, report: &AccountReport) -> Result<()> {
        let path = self.account_path(&report.gmail_account);
        config::write_json_file(&path, report)?;
        info!("Migration report saved to {}", path.display());
        Ok(())
    }

    fn persist_batch(&self, report: &BatchReport) -> Result<()> {
        let path = self.batch_path();
        config::write_json_file(&path, report)?;
        info!("Batch report saved to {}", path.display());
        Ok(())
    }
}

/// Logs a human-readable summary
pub struct LogReportSink;

impl ReportSink for LogReportSink {
    fn persist_account(&self, report: &AccountReport) -> Result<()> {
        info!(
            "{} -> {}: {}",
            report.gmail_account, report.group_email, report.status
        );
        info!(
            "  attempted {}, succeeded {}, failed {}, skipped {}, already migrated {} ({} ms)",
            report.attempted,
            report.succeeded,
            report.failed,
            report.skipped,
            report.already_migrated,
            report.elapsed_ms
        );
        for failure in &report.failed_messages {
            info!("  - {}: {}", failure.id, failure.reason);
        }
        Ok(())
    }

    fn persist_batch(&self, report: &BatchReport) -> Result<()> {
        info!("Batch migration completed");
        info!("  Total users: {}", report.total_users);
        info!("  Successful: {}", report.successful_users);
        info!("  Failed: {}", report.failed_users);
        info!("  Emails processed: {}", report.total_emails_processed);
        info!("  Emails failed: {}", report.total_emails_failed);
        if !report.not_started.is_empty() {
            info!("  Not started: {}", report.not_started.join(", "));
        }
        for entry in &report.summary.failed {
            info!("  - {}: {}", entry.gmail_account, entry.status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RunStats;
    use crate::error::FailureClass;
    use crate::models::MessageId;
    use crate::retry::RetryStats;
    use std::time::Duration;

    fn run(outcome: AccountOutcome) -> AccountRun {
        let now = Utc::now();
        AccountRun {
            account: "alice@example.com".into(),
            destination: "archive@example.com".into(),
            final_state: if outcome.is_fatal() {
                EngineState::Aborted
            } else {
                EngineState::Done
            },
            outcome,
            transitions: vec![EngineState::Init],
            stats: RunStats {
                candidates: 10,
                attempted: 10,
                succeeded: 9,
                failed: 1,
                batches: 1,
                ..RunStats::default()
            },
            failures: vec![MessageFailure {
                id: MessageId::new("m7"),
                reason: "permission denied: m7".into(),
                class: FailureClass::Permanent,
            }],
            resumed: false,
            dry_run: false,
            limited: false,
            checkpoint_completed: 9,
            read_retries: RetryStats {
                retries: 2,
                total_wait: Duration::from_millis(1500),
                ..RetryStats::default()
            },
            write_retries: RetryStats::default(),
            started_at: now - chrono::Duration::seconds(3),
            finished_at: now,
        }
    }

    #[test]
    fn test_status_lines() {
        let mut r = run(AccountOutcome::Completed);
        assert_eq!(status_line(&r), "fully migrated");
        r.resumed = true;
        assert_eq!(status_line(&r), "resumed and completed");
        r.dry_run = true;
        assert_eq!(status_line(&r), "resumed and completed (dry run)");

        let r = run(AccountOutcome::CompletedWithFailures { failed: 3 });
        assert_eq!(status_line(&r), "completed with 3 unrecoverable message failures");

        let r = run(AccountOutcome::SkippedAlreadyComplete);
        assert_eq!(status_line(&r), "already complete");

        let r = run(AccountOutcome::FatalError {
            kind: "auth".into(),
            message: "authentication failed for admin: revoked".into(),
        });
        assert_eq!(status_line(&r), "failed: authentication failed for admin: revoked");
    }

    #[test]
    fn test_limited_status() {
        let mut r = run(AccountOutcome::Completed);
        r.limited = true;
        assert_eq!(status_line(&r), "partially migrated (message limit reached)");
    }

    #[test]
    fn test_account_report_fields() {
        let report = account_report(&run(AccountOutcome::CompletedWithFailures { failed: 1 }));
        assert_eq!(report.outcome, "completed_with_failures");
        assert_eq!(report.succeeded, 9);
        assert_eq!(report.failed_messages[0].id, MessageId::new("m7"));
        assert_eq!(report.retries, 2);
        assert_eq!(report.retry_wait_ms, 1500);
        assert_eq!(report.elapsed_ms, 3000);
        assert!(!report.is_failure());
    }

    #[test]
    fn test_batch_report_totals() {
        let mut result = BatchResult::new();
        result.push(run(AccountOutcome::CompletedWithFailures { failed: 1 }));
        let mut fatal = run(AccountOutcome::FatalError {
            kind: "enumeration".into(),
            message: "message enumeration failed".into(),
        });
        fatal.account = "bob@example.com".into();
        fatal.stats = RunStats::default();
        result.push(fatal);

        let report = batch_report(&result, Some(Path::new("batch.yaml")));
        assert_eq!(report.total_users, 2);
        assert_eq!(report.successful_users, 1);
        assert_eq!(report.failed_users, 1);
        assert_eq!(report.total_emails_processed, 9);
        assert_eq!(report.total_emails_failed, 1);
        assert_eq!(report.summary.failed[0].gmail_account, "bob@example.com");
        assert_eq!(report.batch_config_file.as_deref(), Some("batch.yaml"));
    }

    #[test]
    fn test_batch_report_is_a_function_of_the_result() {
        let mut result = BatchResult::new();
        result.push(run(AccountOutcome::Completed));
        let last = result.runs[0].finished_at;

        let first = batch_report(&result, None);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(batch_report(&result, None), first);
        assert_eq!(first.batch_migration_date, last);

        let finished = Utc::now();
        result.finished_at = Some(finished);
        assert_eq!(batch_report(&result, None).batch_migration_date, finished);
    }

    #[test]
    fn test_json_sink_writes_reports() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonReportSink::new(dir.path());
        let report = account_report(&run(AccountOutcome::Completed));

        sink.persist_account(&report).unwrap();
        let saved: AccountReport =
            config::load_json_file(&sink.account_path("alice@example.com")).unwrap();
        assert_eq!(saved, report);

        let mut result = BatchResult::new();
        result.push(run(AccountOutcome::Completed));
        sink.persist_batch(&batch_report(&result, None)).unwrap();
        assert!(sink.batch_path().exists());
    }

    struct BrokenSink;

    impl ReportSink for BrokenSink {
        fn persist_account(&self, _report: &AccountReport) -> Result<()> {
            anyhow::bail!("read-only file system")
        }

        fn persist_batch(&self, _report: &BatchReport) -> Result<()> {
            anyhow::bail!("read-only file system")
        }
    }

    #[test]
    fn test_sink_failure_does_not_stop_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let json = JsonReportSink::new(dir.path());
        let report = account_report(&run(AccountOutcome::Completed));

        deliver_account(&[&BrokenSink, &json], &report);
        assert!(json.account_path("alice@example.com").exists());
    }
}
