//! Cron-driven foreground scheduler.
//!
//! `opsbackup schedule --cron "0 0 3 * * *" backup` keeps a process
//! running the given operation on a cadence, replacing the crontab +
//! wrapper-script pairing. Overlap protection comes from the run lock:
//! if the previous tick is still running, the new tick loses the lock
//! and is skipped.

use crate::backup::manifest::ComponentFlags;
use crate::config::Config;
use crate::ops;
use crate::recovery::Scenario;
use std::sync::Arc;
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

/// Operations that make sense on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ScheduledOp {
    /// Full backup (database + redis + files)
    Backup,
    /// Verify every artifact in the backup directory
    Verify,
    /// Retention cleanup
    Cleanup,
    /// Cross-region replication
    Replicate,
    /// PITR base backup
    Basebackup,
    /// Dry-run recovery drill; alerts fire if selection or planning breaks
    DrTest,
}

impl ScheduledOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduledOp::Backup => "backup",
            ScheduledOp::Verify => "verify",
            ScheduledOp::Cleanup => "cleanup",
            ScheduledOp::Replicate => "replicate",
            ScheduledOp::Basebackup => "basebackup",
            ScheduledOp::DrTest => "dr-test",
        }
    }
}

async fn run_once(config: Arc<Config>, op: ScheduledOp) -> i32 {
    match op {
        ScheduledOp::Backup => ops::backup(&config, ComponentFlags::full()).await,
        ScheduledOp::Verify => ops::verify_op(&config).await,
        ScheduledOp::Cleanup => ops::cleanup_op(&config).await,
        ScheduledOp::Replicate => ops::replicate_op(&config).await,
        ScheduledOp::Basebackup => ops::basebackup_op(&config).await,
        ScheduledOp::DrTest => {
            // A drill must never touch production state
            let mut drill = (*config).clone();
            drill.general.dry_run = true;
            ops::recover(&drill, Scenario::Full).await
        }
    }
}

/// Run `op` on the given 6-field cron expression until SIGINT/SIGTERM.
pub async fn run(config: Config, cron: &str, op: ScheduledOp) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let scheduler = JobScheduler::new().await?;

    let job_config = config.clone();
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let config = job_config.clone();
        Box::pin(async move {
            info!(operation = op.as_str(), "Scheduled run starting");
            let exit_code = run_once(config, op).await;
            if exit_code == 0 {
                info!(operation = op.as_str(), "Scheduled run finished");
            } else {
                warn!(operation = op.as_str(), exit_code, "Scheduled run failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!(cron = %cron, operation = op.as_str(), "Scheduler started");

    wait_for_signal().await;

    info!("Shutting down scheduler");
    let mut scheduler = scheduler;
    scheduler.shutdown().await?;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
