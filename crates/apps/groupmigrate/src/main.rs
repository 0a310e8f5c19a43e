//! groupmigrate - move Gmail mailboxes into Google Groups archives
//!
//! This is the main entry point for the command-line tool.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use migrate::report::{self, ReportSink};
use migrate::settings::{ResolvedPaths, SettingsFile};
use migrate::{
    AccountMigrationJob, AccountSettings, BatchOrchestrator, BatchResult, BatchSettings,
    CancelToken, CheckpointStore, Collaborators, FileCheckpointStore, GmailClient,
    GroupsArchiveClient, JsonReportSink, LogReportSink, OAuthCredentialProvider, RunOverrides,
    RuntimeOptions, ThreadSleeper,
};

/// Exit status for configuration and bootstrap errors
const EXIT_CONFIG: u8 = 2;
/// Exit status when every account failed
const EXIT_ALL_FAILED: u8 = 1;
/// Exit status after a second Ctrl-C
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "groupmigrate",
    version,
    about = "Migrate Gmail mailboxes into Google Groups archives, resumably"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate a single account
    Run {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Gmail account to migrate from
        #[arg(long)]
        gmail_account: Option<String>,

        /// Google Group to migrate into
        #[arg(long)]
        group_email: Option<String>,

        /// Gmail search query selecting the messages
        #[arg(long)]
        query: Option<String>,

        /// Messages per checkpointed batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stop after this many messages
        #[arg(long)]
        limit: Option<usize>,

        /// Fetch and validate messages without inserting them
        #[arg(long)]
        dry_run: bool,

        /// Enumerate again even if the account is already complete
        #[arg(long)]
        rescan: bool,

        /// Dry run of one message, saved to the report directory for inspection
        #[arg(long)]
        test_mode: bool,
    },

    /// Migrate every account of a batch configuration
    Batch {
        /// YAML batch configuration file
        #[arg(short, long, env = "GROUPMIGRATE_CONFIG")]
        config: PathBuf,

        /// Migrate only this account
        #[arg(long)]
        user: Option<String>,

        /// Stop each account after this many messages
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        rescan: bool,
    },

    /// Show checkpoint progress for every configured account
    Status {
        #[arg(short, long, env = "GROUPMIGRATE_CONFIG")]
        config: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Delete the checkpoint of one account
    Reset {
        #[arg(short, long, env = "GROUPMIGRATE_CONFIG")]
        config: PathBuf,

        #[arg(long)]
        account: String,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run(cli.command) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run {
            config,
            gmail_account,
            group_email,
            query,
            batch_size,
            limit,
            dry_run,
            rescan,
            test_mode,
        } => {
            let mut settings = match &config {
                Some(path) => AccountSettings::load(path)?,
                None => AccountSettings::default(),
            };
            settings.apply(&RunOverrides {
                gmail_account,
                group_email,
                query,
                batch_size,
            });
            let runtime = RuntimeOptions {
                limit,
                dry_run,
                rescan,
                test_mode,
            };
            let job = settings.job(&runtime)?;
            let paths = settings.paths()?;
            if test_mode {
                info!(
                    "Test mode: one message will be fetched and saved under {}",
                    paths.inspect_dir().display()
                );
            }

            let result = migrate_accounts(&[job], &paths, Duration::ZERO)?;
            publish(&result, &paths, None);
            Ok(exit_code(&result))
        }

        Commands::Batch {
            config,
            user,
            limit,
            dry_run,
            rescan,
        } => {
            let mut settings = BatchSettings::load(&config)?;
            if let Some(user) = &user {
                settings.select_user(user)?;
                info!("Migrating single user: {}", user);
            }
            let runtime = RuntimeOptions {
                limit,
                dry_run,
                rescan,
                test_mode: false,
            };
            let jobs = settings.jobs(&runtime)?;
            let paths = settings.paths()?;

            let result = migrate_accounts(&jobs, &paths, settings.user_delay())?;
            publish(&result, &paths, Some(&config));
            Ok(exit_code(&result))
        }

        Commands::Status { config, json } => {
            let settings = SettingsFile::load(&config)?;
            let jobs = settings.jobs(&RuntimeOptions::default())?;
            let store = FileCheckpointStore::new(&settings.paths()?.state_dir)?;
            print_status(&store, &jobs, json)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Reset { config, account } => {
            let settings = SettingsFile::load(&config)?;
            let jobs = settings.jobs(&RuntimeOptions::default())?;
            if !jobs.iter().any(|j| j.account.eq_ignore_ascii_case(&account)) {
                warn!("{} is not listed in {}", account, config.display());
            }
            let store = FileCheckpointStore::new(&settings.paths()?.state_dir)?;
            let path = store.path_for(&account);
            store.remove(&account)?;
            info!("Removed checkpoint {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Run jobs against the Google APIs
///
/// The first Ctrl-C stops cleanly after the current message. A second one
/// exits at once; progress up to the last saved batch is kept.
fn migrate_accounts(
    jobs: &[AccountMigrationJob],
    paths: &ResolvedPaths,
    account_delay: Duration,
) -> Result<BatchResult> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            warn!("Second interrupt, exiting now");
            std::process::exit(EXIT_INTERRUPTED);
        }
        warn!("Interrupt received, stopping after the current message (Ctrl-C again to exit now)");
        handler_token.cancel();
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let checkpoints = FileCheckpointStore::new(&paths.state_dir)
        .context("Failed to open checkpoint directory")?;
    let credentials = OAuthCredentialProvider::new().with_cancel(cancel.clone());
    let source = GmailClient::new();
    let archive = GroupsArchiveClient::new();
    let sleeper = ThreadSleeper::new(cancel.clone());

    let deps = Collaborators {
        credentials: &credentials,
        source: &source,
        archive: &archive,
        checkpoints: &checkpoints,
        sleeper: &sleeper,
        cancel,
    };
    Ok(BatchOrchestrator::new(deps)
        .with_account_delay(account_delay)
        .run(jobs))
}

/// Log and save reports; failures here never change the exit status
fn publish(result: &BatchResult, paths: &ResolvedPaths, batch_config: Option<&Path>) {
    let json = JsonReportSink::new(&paths.report_dir);
    let sinks: [&dyn ReportSink; 2] = [&LogReportSink, &json];

    for run in &result.runs {
        report::deliver_account(&sinks, &report::account_report(run));
    }
    if let Some(config) = batch_config {
        report::deliver_batch(&sinks, &report::batch_report(result, Some(config)));
    }
}

fn exit_code(result: &BatchResult) -> ExitCode {
    if result.all_failed() {
        ExitCode::from(EXIT_ALL_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}

fn print_status(
    store: &FileCheckpointStore,
    jobs: &[AccountMigrationJob],
    json: bool,
) -> Result<()> {
    let mut rows = Vec::new();
    for job in jobs {
        let record = store.load(&job.account)?;
        let complete = record.scope_covers(&job.destination, &job.query);
        rows.push(serde_json::json!({
            "gmail_account": job.account,
            "group_email": job.destination,
            "migrated": record.completed_count(),
            "failed": record.failed_count(),
            "complete": complete,
            "last_updated": (!record.is_empty()).then_some(record.last_updated),
        }));

        if !json {
            let state = if complete {
                "complete"
            } else if record.is_empty() {
                "not started"
            } else {
                "in progress"
            };
            println!(
                "{} -> {}: {} ({} migrated, {} failed{})",
                job.account,
                job.destination,
                state,
                record.completed_count(),
                record.failed_count(),
                if record.is_empty() {
                    String::new()
                } else {
                    format!(
                        ", last updated {}",
                        record.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
                    )
                }
            );
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Ok(())
}
