//! opsbackup - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use opsbackup::backup::manifest::{ArtifactKind, ComponentFlags};
use opsbackup::config::Config;
use opsbackup::recovery::Scenario;
use opsbackup::sched::{self, ScheduledOp};
use opsbackup::{ops, utils};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log and skip every external command instead of running it
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create backups and write the run manifest
    Backup {
        /// Component to back up (default: all)
        #[arg(value_enum)]
        component: Option<BackupComponent>,
    },
    /// Verify every artifact in the backup directory
    Verify,
    /// Remove artifacts past the retention window
    Cleanup,
    /// Restore from a backup (exit 0 success, 1 failed, 2 rolled back)
    Recover {
        #[arg(value_enum)]
        scenario: Scenario,

        /// Artifact to restore: `latest` or a name/timestamp token
        #[arg(long)]
        recovery_point: Option<String>,
    },
    /// Replicate recent artifacts to the configured regions
    Replicate,
    /// Take a PITR base backup with pg_basebackup
    Basebackup,
    /// Run an operation on a cron schedule until SIGINT/SIGTERM
    Schedule {
        /// Cron expression, e.g. "0 0 3 * * *"
        #[arg(long)]
        cron: String,

        #[arg(value_enum)]
        operation: ScheduledOp,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum BackupComponent {
    Full,
    Database,
    Redis,
    Files,
}

impl BackupComponent {
    fn flags(self) -> ComponentFlags {
        match self {
            BackupComponent::Full => ComponentFlags::full(),
            BackupComponent::Database => ComponentFlags::only(ArtifactKind::Database),
            BackupComponent::Redis => ComponentFlags::only(ArtifactKind::Redis),
            BackupComponent::Files => ComponentFlags::only(ArtifactKind::Files),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration: file (if given), then env overrides on top
    let _ = dotenvy::dotenv();
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };
    config.apply_env_overrides();
    if args.dry_run {
        config.general.dry_run = true;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting opsbackup v{} (instance: {})",
        env!("CARGO_PKG_VERSION"),
        config.general.instance
    );

    let exit_code = match args.command {
        Command::Backup { component } => {
            let flags = component.unwrap_or(BackupComponent::Full).flags();
            ops::backup(&config, flags).await
        }
        Command::Verify => ops::verify_op(&config).await,
        Command::Cleanup => ops::cleanup_op(&config).await,
        Command::Recover {
            scenario,
            recovery_point,
        } => {
            if let Some(point) = recovery_point {
                config.recovery.recovery_point = point;
            }
            ops::recover(&config, scenario).await
        }
        Command::Replicate => ops::replicate_op(&config).await,
        Command::Basebackup => ops::basebackup_op(&config).await,
        Command::Schedule { cron, operation } => {
            sched::run(config, &cron, operation).await?;
            0
        }
    };

    std::process::exit(exit_code);
}
