//! Typed migration settings
//!
//! YAML configuration is parsed into [`AccountSettings`] (one account, used
//! by `run`) or [`BatchSettings`] (many accounts, used by `batch`), validated
//! once, and resolved into immutable [`AccountMigrationJob`]s. Per-account
//! overrides in a batch file win over the file's top-level defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::{AccountMigrationJob, DEFAULT_MAX_MESSAGE_SIZE, OversizedPolicy};
use crate::providers::CredentialRef;
use crate::retry::RetryPolicy;

/// Defaults shared by every account of a configuration file
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigrationDefaults {
    pub gmail_credentials_file: PathBuf,
    pub admin_credentials_file: PathBuf,
    pub gmail_query: String,
    pub batch_size: usize,
    /// Seconds
    pub batch_delay: f64,
    pub max_retries: u32,
    pub oversized_policy: OversizedPolicy,
    pub max_message_size: u64,
    pub max_emails: Option<usize>,
    /// Workspace domain, shown when asking for admin consent
    pub domain: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub token_dir: Option<PathBuf>,
}

impl Default for MigrationDefaults {
    fn default() -> Self {
        Self {
            gmail_credentials_file: PathBuf::from("gmail_credentials.json"),
            admin_credentials_file: PathBuf::from("admin_credentials.json"),
            gmail_query: "in:all".to_string(),
            batch_size: 10,
            batch_delay: 1.0,
            max_retries: 5,
            oversized_policy: OversizedPolicy::Skip,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_emails: None,
            domain: None,
            state_dir: None,
            report_dir: None,
            token_dir: None,
        }
    }
}

/// Per-account values that replace the file defaults when present
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AccountOverrides {
    pub gmail_query: Option<String>,
    pub batch_size: Option<usize>,
    pub batch_delay: Option<f64>,
    pub max_retries: Option<u32>,
    pub oversized_policy: Option<OversizedPolicy>,
    pub max_message_size: Option<u64>,
    pub max_emails: Option<usize>,
}

/// One entry of a batch file's `users` list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserEntry {
    pub gmail_account: String,
    pub group_email: String,
    #[serde(flatten)]
    pub overrides: AccountOverrides,
}

/// Configuration for a single-account `run`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AccountSettings {
    #[serde(default)]
    pub gmail_account: Option<String>,
    #[serde(default)]
    pub group_email: Option<String>,
    #[serde(flatten)]
    pub defaults: MigrationDefaults,
}

/// Configuration for a multi-account `batch`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchSettings {
    #[serde(flatten)]
    pub defaults: MigrationDefaults,
    /// Seconds to wait between two accounts
    #[serde(default = "default_user_delay")]
    pub user_delay: f64,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

fn default_user_delay() -> f64 {
    5.0
}

/// Options given on the command line for one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    /// Replaces `max_emails` for every account
    pub limit: Option<usize>,
    pub dry_run: bool,
    pub rescan: bool,
    /// Dry run of a single message, saved for inspection
    pub test_mode: bool,
}

/// Command-line replacements for a single-account configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
    pub gmail_account: Option<String>,
    pub group_email: Option<String>,
    pub query: Option<String>,
    pub batch_size: Option<usize>,
}

/// Directories a configuration resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub state_dir: PathBuf,
    pub report_dir: PathBuf,
    pub token_dir: PathBuf,
}

impl ResolvedPaths {
    /// Where test-mode runs save fetched messages
    pub fn inspect_dir(&self) -> PathBuf {
        self.report_dir.join("inspect")
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    config::load_yaml_file(path).map_err(|e| ConfigError::Load(format!("{:#}", e)))
}

fn validate_address(field: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ConfigError::invalid(
            field,
            format!("{:?} is not an email address", value),
        )),
    }
}

/// Convert a delay in seconds, rejecting values a `Duration` cannot hold
fn delay_from_secs(field: &str, seconds: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(seconds).map_err(|_| {
        ConfigError::invalid(
            field,
            format!("{} is not a non-negative number of seconds", seconds),
        )
    })
}

fn validate_delay(field: &str, seconds: f64) -> Result<(), ConfigError> {
    delay_from_secs(field, seconds).map(|_| ())
}

/// A message limit of zero would never migrate anything
fn validate_limit(field: &str, limit: Option<usize>) -> Result<(), ConfigError> {
    if limit == Some(0) {
        return Err(ConfigError::invalid(field, "must be greater than 0"));
    }
    Ok(())
}

fn validate_values(
    prefix: &str,
    batch_size: usize,
    batch_delay: f64,
    max_retries: u32,
    max_message_size: u64,
    max_emails: Option<usize>,
) -> Result<(), ConfigError> {
    let field = |name: &str| format!("{}{}", prefix, name);
    validate_limit(&field("max_emails"), max_emails)?;
    if batch_size == 0 {
        return Err(ConfigError::invalid(field("batch_size"), "must be greater than 0"));
    }
    validate_delay(&field("batch_delay"), batch_delay)?;
    if max_retries == 0 {
        return Err(ConfigError::invalid(field("max_retries"), "must be greater than 0"));
    }
    if max_message_size == 0 {
        return Err(ConfigError::invalid(
            field("max_message_size"),
            "must be greater than 0",
        ));
    }
    Ok(())
}

impl MigrationDefaults {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_values(
            "",
            self.batch_size,
            self.batch_delay,
            self.max_retries,
            self.max_message_size,
            self.max_emails,
        )
    }

    /// Resolve state, report, and token directories
    ///
    /// Unset directories fall back to the per-user defaults.
    pub fn paths(&self) -> Result<ResolvedPaths, ConfigError> {
        let state_dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => config::checkpoint_dir().ok_or(ConfigError::Missing("state_dir"))?,
        };
        let report_dir = match &self.report_dir {
            Some(dir) => dir.clone(),
            None => config::report_dir().ok_or(ConfigError::Missing("report_dir"))?,
        };
        let token_dir = match &self.token_dir {
            Some(dir) => dir.clone(),
            None => config::token_dir().ok_or(ConfigError::Missing("token_dir"))?,
        };
        Ok(ResolvedPaths {
            state_dir,
            report_dir,
            token_dir,
        })
    }

    /// Build a job for one account, applying `overrides` over these defaults
    pub fn resolve(
        &self,
        account: &str,
        destination: &str,
        overrides: &AccountOverrides,
        paths: &ResolvedPaths,
    ) -> Result<AccountMigrationJob, ConfigError> {
        let account = account.trim();
        let destination = destination.trim();
        validate_address("gmail_account", account)?;
        validate_address("group_email", destination)?;

        let batch_size = overrides.batch_size.unwrap_or(self.batch_size);
        let batch_delay = overrides.batch_delay.unwrap_or(self.batch_delay);
        let max_retries = overrides.max_retries.unwrap_or(self.max_retries);
        let max_message_size = overrides.max_message_size.unwrap_or(self.max_message_size);
        let max_emails = overrides.max_emails.or(self.max_emails);
        validate_values(
            &format!("{}.", account),
            batch_size,
            batch_delay,
            max_retries,
            max_message_size,
            max_emails,
        )?;

        let stem = config::file_stem_for(account);
        let credentials = (
            CredentialRef::new(
                &self.gmail_credentials_file,
                paths.token_dir.join(format!("{}_gmail_token.json", stem)),
            ),
            CredentialRef::new(
                &self.admin_credentials_file,
                paths.token_dir.join("admin_token.json"),
            ),
        );

        Ok(AccountMigrationJob::new(account, destination)
            .with_query(
                overrides
                    .gmail_query
                    .clone()
                    .unwrap_or_else(|| self.gmail_query.clone()),
            )
            .with_batch_size(batch_size)
            .with_batch_delay(delay_from_secs("batch_delay", batch_delay)?)
            .with_retry(RetryPolicy {
                max_attempts: max_retries,
                ..RetryPolicy::default()
            })
            .with_oversized(
                overrides.oversized_policy.unwrap_or(self.oversized_policy),
                max_message_size,
            )
            .with_max_messages(max_emails)
            .with_credentials(credentials.0, credentials.1))
    }
}

/// Apply command-line options to a resolved job
fn apply_runtime(
    job: AccountMigrationJob,
    runtime: &RuntimeOptions,
    paths: &ResolvedPaths,
) -> Result<AccountMigrationJob, ConfigError> {
    validate_limit("limit", runtime.limit)?;
    let limit = if runtime.test_mode {
        Some(1)
    } else {
        runtime.limit.or(job.max_messages)
    };
    let inspect_dir = runtime.test_mode.then(|| paths.inspect_dir());
    Ok(job
        .with_max_messages(limit)
        .with_dry_run(runtime.dry_run || runtime.test_mode)
        .with_rescan(runtime.rescan)
        .with_inspect_dir(inspect_dir))
}

impl AccountSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_yaml(path)
    }

    /// Replace file values with the ones given on the command line
    pub fn apply(&mut self, overrides: &RunOverrides) {
        if let Some(account) = &overrides.gmail_account {
            self.gmail_account = Some(account.clone());
        }
        if let Some(group) = &overrides.group_email {
            self.group_email = Some(group.clone());
        }
        if let Some(query) = &overrides.query {
            self.defaults.gmail_query = query.clone();
        }
        if let Some(batch_size) = overrides.batch_size {
            self.defaults.batch_size = batch_size;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let account = self
            .gmail_account
            .as_deref()
            .ok_or(ConfigError::Missing("gmail_account"))?;
        let group = self
            .group_email
            .as_deref()
            .ok_or(ConfigError::Missing("group_email"))?;
        validate_address("gmail_account", account)?;
        validate_address("group_email", group)?;
        self.defaults.validate()
    }

    pub fn paths(&self) -> Result<ResolvedPaths, ConfigError> {
        self.defaults.paths()
    }

    pub fn job(&self, runtime: &RuntimeOptions) -> Result<AccountMigrationJob, ConfigError> {
        self.validate()?;
        let paths = self.paths()?;
        let account = self.gmail_account.as_deref().unwrap_or_default();
        let group = self.group_email.as_deref().unwrap_or_default();
        let job = self
            .defaults
            .resolve(account, group, &AccountOverrides::default(), &paths)?;
        apply_runtime(job, runtime, &paths)
    }
}

impl BatchSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_yaml(path)
    }

    /// Pause between accounts; zero when the configured value is unusable
    pub fn user_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.user_delay).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.defaults.validate()?;
        validate_delay("user_delay", self.user_delay)?;
        if self.users.is_empty() {
            return Err(ConfigError::NoUsers);
        }

        let mut seen = HashSet::new();
        for user in &self.users {
            validate_address("gmail_account", &user.gmail_account)?;
            validate_address("group_email", &user.group_email)?;
            if !seen.insert(user.gmail_account.trim().to_lowercase()) {
                return Err(ConfigError::DuplicateAccount(user.gmail_account.clone()));
            }
        }
        Ok(())
    }

    pub fn paths(&self) -> Result<ResolvedPaths, ConfigError> {
        self.defaults.paths()
    }

    /// Keep only the entry for `account`
    pub fn select_user(&mut self, account: &str) -> Result<(), ConfigError> {
        let account = account.trim();
        self.users
            .retain(|u| u.gmail_account.trim().eq_ignore_ascii_case(account));
        if self.users.is_empty() {
            return Err(ConfigError::UnknownUser(account.to_string()));
        }
        Ok(())
    }

    /// Resolve every user into a job, in file order
    pub fn jobs(&self, runtime: &RuntimeOptions) -> Result<Vec<AccountMigrationJob>, ConfigError> {
        self.validate()?;
        let paths = self.paths()?;
        self.users
            .iter()
            .map(|user| {
                self.defaults
                    .resolve(&user.gmail_account, &user.group_email, &user.overrides, &paths)
                    .and_then(|job| apply_runtime(job, runtime, &paths))
            })
            .collect()
    }
}

/// Either kind of configuration file
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsFile {
    Single(AccountSettings),
    Batch(BatchSettings),
}

impl SettingsFile {
    /// Load a file, treating it as a batch file when it has a `users` list
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = load_yaml(path)?;
        let is_batch = value
            .as_mapping()
            .is_some_and(|m| m.contains_key("users"));
        let parsed = if is_batch {
            serde_yaml::from_value(value).map(Self::Batch)
        } else {
            serde_yaml::from_value(value).map(Self::Single)
        };
        parsed.map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))
    }

    pub fn jobs(&self, runtime: &RuntimeOptions) -> Result<Vec<AccountMigrationJob>, ConfigError> {
        match self {
            Self::Single(settings) => Ok(vec![settings.job(runtime)?]),
            Self::Batch(settings) => settings.jobs(runtime),
        }
    }

    pub fn paths(&self) -> Result<ResolvedPaths, ConfigError> {
        match self {
            Self::Single(settings) => settings.paths(),
            Self::Batch(settings) => settings.paths(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH: &str = r#"
gmail_credentials_file: creds/gmail.json
admin_credentials_file: creds/admin.json
batch_size: 20
batch_delay: 0.5
state_dir: /tmp/gm/state
report_dir: /tmp/gm/reports
token_dir: /tmp/gm/tokens
user_delay: 2
users:
  - gmail_account: alice@example.com
    group_email: alice-archive@example.com
  - gmail_account: bob@example.com
    group_email: bob-archive@example.com
    gmail_query: "in:inbox"
    batch_size: 5
    max_emails: 100
    oversized_policy: fail
"#;

    fn batch() -> BatchSettings {
        serde_yaml::from_str(BATCH).unwrap()
    }

    #[test]
    fn test_batch_defaults_and_overrides() {
        let jobs = batch().jobs(&RuntimeOptions::default()).unwrap();
        assert_eq!(jobs.len(), 2);

        let alice = &jobs[0];
        assert_eq!(alice.account, "alice@example.com");
        assert_eq!(alice.query, "in:all");
        assert_eq!(alice.batch_size, 20);
        assert_eq!(alice.batch_delay, Duration::from_millis(500));
        assert_eq!(alice.max_messages, None);
        assert_eq!(alice.retry.max_attempts, 5);
        assert_eq!(alice.source_credentials.client_secrets, PathBuf::from("creds/gmail.json"));
        assert_eq!(
            alice.source_credentials.token_cache,
            PathBuf::from("/tmp/gm/tokens/alice_at_example.com_gmail_token.json")
        );
        assert_eq!(
            alice.destination_credentials.token_cache,
            PathBuf::from("/tmp/gm/tokens/admin_token.json")
        );

        let bob = &jobs[1];
        assert_eq!(bob.query, "in:inbox");
        assert_eq!(bob.batch_size, 5);
        assert_eq!(bob.max_messages, Some(100));
        assert_eq!(bob.oversized_policy, OversizedPolicy::Fail);
    }

    #[test]
    fn test_runtime_options_apply_to_every_job() {
        let runtime = RuntimeOptions {
            limit: Some(3),
            dry_run: true,
            rescan: true,
            test_mode: false,
        };
        for job in batch().jobs(&runtime).unwrap() {
            assert_eq!(job.max_messages, Some(3));
            assert!(job.dry_run);
            assert!(job.rescan);
            assert!(job.inspect_dir.is_none());
        }
    }

    #[test]
    fn test_test_mode() {
        let runtime = RuntimeOptions {
            test_mode: true,
            ..RuntimeOptions::default()
        };
        let jobs = batch().jobs(&runtime).unwrap();
        assert_eq!(jobs[0].max_messages, Some(1));
        assert!(jobs[0].dry_run);
        assert_eq!(
            jobs[0].inspect_dir.as_deref(),
            Some(Path::new("/tmp/gm/reports/inspect"))
        );
    }

    #[test]
    fn test_user_delay() {
        assert_eq!(batch().user_delay(), Duration::from_secs(2));
        let minimal: BatchSettings = serde_yaml::from_str(
            "users:\n  - gmail_account: a@x.com\n    group_email: g@x.com\n",
        )
        .unwrap();
        assert_eq!(minimal.user_delay(), Duration::from_secs(5));
        assert_eq!(minimal.defaults, MigrationDefaults::default());
    }

    #[test]
    fn test_select_user() {
        let mut settings = batch();
        settings.select_user("BOB@example.com").unwrap();
        assert_eq!(settings.users.len(), 1);
        assert_eq!(settings.users[0].gmail_account, "bob@example.com");

        let mut settings = batch();
        assert_eq!(
            settings.select_user("carol@example.com"),
            Err(ConfigError::UnknownUser("carol@example.com".into()))
        );
    }

    #[test]
    fn test_batch_validation() {
        let mut settings = batch();
        settings.users[1].gmail_account = "Alice@example.com".into();
        assert!(matches!(settings.validate(), Err(ConfigError::DuplicateAccount(_))));

        let mut settings = batch();
        settings.users.clear();
        assert_eq!(settings.validate(), Err(ConfigError::NoUsers));

        let mut settings = batch();
        settings.users[0].group_email = "not-an-address".into();
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));

        let mut settings = batch();
        settings.user_delay = -1.0;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));

        let mut settings = batch();
        settings.users[1].overrides.batch_size = Some(0);
        let err = settings.jobs(&RuntimeOptions::default()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::invalid("bob@example.com.batch_size", "must be greater than 0")
        );
    }

    #[test]
    fn test_defaults_validation() {
        let mut defaults = MigrationDefaults::default();
        assert!(defaults.validate().is_ok());

        defaults.max_retries = 0;
        assert!(defaults.validate().is_err());

        let mut defaults = MigrationDefaults::default();
        defaults.batch_delay = f64::NAN;
        assert!(defaults.validate().is_err());

        let mut defaults = MigrationDefaults::default();
        defaults.max_message_size = 0;
        assert!(defaults.validate().is_err());
    }

    #[test]
    fn test_delays_beyond_duration_range_are_rejected() {
        let mut defaults = MigrationDefaults::default();
        defaults.batch_delay = 1e300;
        assert!(matches!(defaults.validate(), Err(ConfigError::Invalid { .. })));

        let mut settings = batch();
        settings.users[0].overrides.batch_delay = Some(1e300);
        assert!(matches!(
            settings.jobs(&RuntimeOptions::default()),
            Err(ConfigError::Invalid { .. })
        ));

        let mut settings = batch();
        settings.user_delay = 1e300;
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid { .. })));
        assert_eq!(settings.user_delay(), Duration::ZERO);
    }

    #[test]
    fn test_zero_message_limits_are_rejected() {
        let mut settings = batch();
        settings.defaults.max_emails = Some(0);
        assert_eq!(
            settings.validate(),
            Err(ConfigError::invalid("max_emails", "must be greater than 0"))
        );

        let mut settings = batch();
        settings.users[1].overrides.max_emails = Some(0);
        assert_eq!(
            settings.jobs(&RuntimeOptions::default()).unwrap_err(),
            ConfigError::invalid("bob@example.com.max_emails", "must be greater than 0")
        );

        let runtime = RuntimeOptions {
            limit: Some(0),
            ..RuntimeOptions::default()
        };
        assert_eq!(
            batch().jobs(&runtime).unwrap_err(),
            ConfigError::invalid("limit", "must be greater than 0")
        );
    }

    #[test]
    fn test_single_account_with_cli_overrides() {
        let mut settings: AccountSettings = serde_yaml::from_str(
            "gmail_account: alice@example.com\ngroup_email: archive@example.com\nbatch_size: 25\ntoken_dir: /tmp/t\n",
        )
        .unwrap();
        settings.apply(&RunOverrides {
            query: Some("after:2024/01/01".into()),
            batch_size: Some(50),
            ..RunOverrides::default()
        });

        let job = settings.job(&RuntimeOptions::default()).unwrap();
        assert_eq!(job.account, "alice@example.com");
        assert_eq!(job.query, "after:2024/01/01");
        assert_eq!(job.batch_size, 50);
    }

    #[test]
    fn test_flags_alone_form_a_job() {
        let mut settings = AccountSettings::default();
        assert_eq!(settings.validate(), Err(ConfigError::Missing("gmail_account")));

        settings.apply(&RunOverrides {
            gmail_account: Some("alice@example.com".into()),
            group_email: Some("archive@example.com".into()),
            ..RunOverrides::default()
        });
        settings.defaults.token_dir = Some(PathBuf::from("/tmp/t"));
        settings.defaults.state_dir = Some(PathBuf::from("/tmp/s"));
        settings.defaults.report_dir = Some(PathBuf::from("/tmp/r"));
        assert!(settings.job(&RuntimeOptions::default()).is_ok());
    }

    #[test]
    fn test_settings_file_detects_kind() {
        let dir = tempfile::tempdir().unwrap();
        let batch_path = dir.path().join("batch.yaml");
        std::fs::write(&batch_path, BATCH).unwrap();
        let single_path = dir.path().join("config.yaml");
        std::fs::write(
            &single_path,
            "gmail_account: alice@example.com\ngroup_email: archive@example.com\n",
        )
        .unwrap();

        assert!(matches!(SettingsFile::load(&batch_path).unwrap(), SettingsFile::Batch(_)));
        assert!(matches!(SettingsFile::load(&single_path).unwrap(), SettingsFile::Single(_)));
        assert!(matches!(
            SettingsFile::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_malformed_yaml_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "users: [unclosed").unwrap();
        assert!(matches!(BatchSettings::load(&path), Err(ConfigError::Load(_))));
    }
}
