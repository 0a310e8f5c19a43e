//! Account migration job

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::providers::CredentialRef;
use crate::retry::RetryPolicy;

/// Groups Migration API upload limit
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 25 * 1024 * 1024;

/// What to do with a message larger than the configured maximum
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizedPolicy {
    /// Leave the message out and count it as skipped
    #[default]
    Skip,
    /// Record the message as a permanent failure
    Fail,
}

/// One source-to-destination migration task
///
/// Resolved once from batch defaults and per-account overrides, then passed
/// by reference through the engine for the duration of the run.
#[derive(Debug, Clone)]
pub struct AccountMigrationJob {
    /// Source mailbox
    pub account: String,
    /// Destination group archive
    pub destination: String,
    /// Gmail search filter
    pub query: String,
    /// Messages per checkpointed batch (> 0)
    pub batch_size: usize,
    /// Pause after each batch
    pub batch_delay: Duration,
    pub retry: RetryPolicy,
    pub oversized_policy: OversizedPolicy,
    pub max_message_size: u64,
    /// Stop after this many pending messages were processed
    pub max_messages: Option<usize>,
    /// Fetch and validate only; never insert or save the checkpoint
    pub dry_run: bool,
    /// Enumerate even if the checkpoint says the query is complete
    pub rescan: bool,
    /// Write each fetched raw message here for inspection
    pub inspect_dir: Option<PathBuf>,
    pub source_credentials: CredentialRef,
    pub destination_credentials: CredentialRef,
}

impl AccountMigrationJob {
    /// Create a job with default parameters
    ///
    /// Credentials point at `gmail_credentials.json` / `admin_credentials.json`
    /// in the working directory with per-account token caches beside them.
    pub fn new(account: impl Into<String>, destination: impl Into<String>) -> Self {
        let account = account.into();
        let stem = config::file_stem_for(&account);
        Self {
            destination: destination.into(),
            query: "in:all".to_string(),
            batch_size: 10,
            batch_delay: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            oversized_policy: OversizedPolicy::Skip,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_messages: None,
            dry_run: false,
            rescan: false,
            inspect_dir: None,
            source_credentials: CredentialRef::new(
                "gmail_credentials.json",
                format!("{}_gmail_token.json", stem),
            ),
            destination_credentials: CredentialRef::new(
                "admin_credentials.json",
                "admin_token.json",
            ),
            account,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, batch_delay: Duration) -> Self {
        self.batch_delay = batch_delay;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_messages(mut self, max_messages: Option<usize>) -> Self {
        self.max_messages = max_messages;
        self
    }

    pub fn with_oversized(mut self, policy: OversizedPolicy, max_message_size: u64) -> Self {
        self.oversized_policy = policy;
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_rescan(mut self, rescan: bool) -> Self {
        self.rescan = rescan;
        self
    }

    pub fn with_inspect_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.inspect_dir = dir;
        self
    }

    pub fn with_credentials(mut self, source: CredentialRef, destination: CredentialRef) -> Self {
        self.source_credentials = source;
        self.destination_credentials = destination;
        self
    }

    /// Whether `processed` pending messages reach the configured limit
    pub fn limit_reached(&self, processed: usize) -> bool {
        self.max_messages.is_some_and(|max| processed >= max)
    }
}
