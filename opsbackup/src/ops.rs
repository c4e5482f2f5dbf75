//! Top-level operation drivers.
//!
//! One function per CLI subcommand. Each wires the same frame the
//! original scripts each re-implemented: preflight, run lock, step
//! reporting, JSON run report, webhook notification, metrics push, and
//! an exit code for the caller to hand to the process.

use crate::backup::manifest::{ArtifactRecord, ComponentFlags};
use crate::backup::{self, basebackup, retention};
use crate::config::Config;
use crate::error::Result;
use crate::exec::Executor;
use crate::lock::RunLock;
use crate::notify::{Notifier, Severity};
use crate::preflight;
use crate::recovery::{self, RecoveryOutcome, Scenario};
use crate::replicate;
use crate::report::{write_report, RunReport, RunReporter, StepStatus};
use crate::utils::timestamp_token;
use crate::verify;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn backup_tools(config: &Config, components: ComponentFlags) -> Vec<&'static str> {
    let mut tools = Vec::new();
    if components.database {
        tools.extend(["pg_dump", "pg_restore"]);
    }
    if components.redis {
        tools.push("redis-cli");
    }
    if components.files {
        tools.push("tar");
    }
    if config.encryption.enabled {
        tools.push("openssl");
    }
    tools
}

async fn finish(
    config: &Config,
    notifier: &Notifier,
    report: RunReport,
    message: &str,
    severity: Severity,
) -> i32 {
    let exit_code = report.exit_code;
    let artifact_bytes: u64 = report.artifacts.iter().map(|a| a.size_bytes).sum();

    if let Err(e) = write_report(&config.reports_dir(), &report) {
        warn!(error = %e, "Failed to write run report");
    }

    notifier.send(&report.status, message, severity).await;
    notifier
        .push_metrics(
            &report.operation,
            exit_code == 0,
            report.duration_secs,
            artifact_bytes,
        )
        .await;

    exit_code
}

/// `opsbackup backup [component]`
pub async fn backup(config: &Config, components: ComponentFlags) -> i32 {
    let notifier = Notifier::new(config.notify.clone(), &config.general.instance);

    if let Err(e) = preflight::check(
        &backup_tools(config, components),
        &config.general.backup_dir,
        config.general.min_free_bytes,
    ) {
        error!(error = %e, "Preflight failed");
        return 1;
    }

    let _lock = match RunLock::acquire(&config.lock_path()) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "Another run is in progress");
            return 1;
        }
    };

    let mut reporter = RunReporter::new("backup", &config.general.instance);
    let result = backup::run(config, components, &mut reporter).await;

    match result {
        Ok(outcome) => {
            let records: Vec<ArtifactRecord> =
                outcome.artifacts.iter().map(|a| a.record()).collect();
            let total_bytes: u64 = records.iter().map(|a| a.size_bytes).sum();
            let message = format!(
                "Backup completed: {} artifact(s), {} bytes",
                records.len(),
                total_bytes
            );
            info!("{message}");
            let report = reporter.finish("success", records, false, 0);
            finish(config, &notifier, report, &message, Severity::Info).await
        }
        Err(e) => {
            let message = format!("Backup failed: {e}");
            error!("{message}");
            let verification_failed = matches!(e, crate::error::OpsError::Verification(_));
            let report = reporter.finish("failed", Vec::new(), verification_failed, 1);
            finish(config, &notifier, report, &message, Severity::Critical).await
        }
    }
}

/// `opsbackup verify`
pub async fn verify_op(config: &Config) -> i32 {
    let notifier = Notifier::new(config.notify.clone(), &config.general.instance);
    let executor = Executor::new(config.general.dry_run);

    // pg_restore is only a prerequisite when database dumps are present
    let needs_pg = std::fs::read_dir(&config.general.backup_dir)
        .map(|entries| {
            entries.filter_map(|e| e.ok()).any(|e| {
                crate::backup::manifest::ArtifactKind::Database
                    .matches(&e.file_name().to_string_lossy())
            })
        })
        .unwrap_or(false);
    let mut tools: Vec<&'static str> = Vec::new();
    if needs_pg && !executor.is_dry_run() {
        tools.push("pg_restore");
    }
    if let Err(e) = preflight::check(&tools, &config.general.backup_dir, 0) {
        error!(error = %e, "Preflight failed");
        return 1;
    }

    let mut reporter = RunReporter::new("verify", &config.general.instance);
    let (outcomes, failed) = match verify::verify_all(&executor, config).await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "Verification aborted");
            let report = reporter.finish("failed", Vec::new(), true, 1);
            return finish(config, &notifier, report, &format!("Verification aborted: {e}"), Severity::Critical).await;
        }
    };

    for outcome in &outcomes {
        let name = outcome
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        reporter.record(
            &format!("verify {name}"),
            if outcome.passed { StepStatus::Ok } else { StepStatus::Failed },
            outcome.detail.clone(),
        );
    }

    if failed {
        let bad = outcomes.iter().filter(|o| !o.passed).count();
        let message = format!("Verification failed for {bad} of {} artifact(s)", outcomes.len());
        let report = reporter.finish("failed", Vec::new(), true, 1);
        finish(config, &notifier, report, &message, Severity::Warning).await
    } else {
        let message = format!("All {} artifact(s) verified", outcomes.len());
        info!("{message}");
        let report = reporter.finish("success", Vec::new(), false, 0);
        finish(config, &notifier, report, &message, Severity::Info).await
    }
}

/// `opsbackup cleanup`
pub async fn cleanup_op(config: &Config) -> i32 {
    let mut reporter = RunReporter::new("cleanup", &config.general.instance);

    if config.general.dry_run {
        info!("dry-run: skipping retention cleanup");
        return 0;
    }

    match retention::cleanup(
        &config.general.backup_dir,
        config.general.retention_days,
        Utc::now(),
    ) {
        Ok(deleted) => {
            info!(deleted = deleted.len(), "Retention cleanup complete");
            reporter.record(
                "retention_cleanup",
                StepStatus::Ok,
                format!("{} expired artifact(s) removed", deleted.len()),
            );
            let report = reporter.finish("success", Vec::new(), false, 0);
            if let Err(e) = write_report(&config.reports_dir(), &report) {
                warn!(error = %e, "Failed to write run report");
            }
            0
        }
        Err(e) => {
            error!(error = %e, "Retention cleanup failed");
            1
        }
    }
}

/// `opsbackup recover <scenario>` — exit codes 0/1/2 per terminal state.
pub async fn recover(config: &Config, scenario: Scenario) -> i32 {
    let notifier = Notifier::new(config.notify.clone(), &config.general.instance);

    let _lock = match RunLock::acquire(&config.lock_path()) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "Another run is in progress");
            return RecoveryOutcome::Failed.exit_code();
        }
    };

    let mut reporter = RunReporter::new("recover", &config.general.instance);
    let outcome = recovery::run(config, scenario, &mut reporter).await;

    let (message, severity) = match outcome {
        RecoveryOutcome::Success => (
            format!("Recovery ({}) completed", scenario.as_str()),
            Severity::Info,
        ),
        RecoveryOutcome::RolledBack => (
            format!("Recovery ({}) failed and was rolled back", scenario.as_str()),
            Severity::Warning,
        ),
        RecoveryOutcome::Failed => (
            format!("Recovery ({}) FAILED", scenario.as_str()),
            Severity::Critical,
        ),
    };

    let report = reporter.finish(outcome.as_str(), Vec::new(), false, outcome.exit_code());
    finish(config, &notifier, report, &message, severity).await
}

/// `opsbackup replicate`
pub async fn replicate_op(config: &Config) -> i32 {
    let notifier = Notifier::new(config.notify.clone(), &config.general.instance);
    let executor = Executor::new(config.general.dry_run);

    let mut tools = vec!["aws"];
    if config.replication.azure_container.is_some() {
        tools.push("az");
    }
    if config.replication.gcs_bucket.is_some() {
        tools.push("gsutil");
    }
    if executor.is_dry_run() {
        tools.clear();
    }
    if let Err(e) = preflight::check(&tools, &config.general.backup_dir, 0) {
        error!(error = %e, "Preflight failed");
        return 1;
    }

    if config.replication.regions.is_empty() {
        warn!("No replication regions configured, nothing to do");
        return 0;
    }

    // Ctrl-C / SIGTERM drains in-flight uploads instead of killing them
    // mid-transfer.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested, draining in-flight uploads");
            signal_cancel.cancel();
        }
    });

    let mut reporter = RunReporter::new("replicate", &config.general.instance);
    match replicate::run(config, &executor, cancel).await {
        Ok(summary) => {
            for (region, stats) in &summary.per_region {
                reporter.record(
                    &format!("region {region}"),
                    if stats.failed == 0 { StepStatus::Ok } else { StepStatus::Failed },
                    format!(
                        "{} uploaded, {} verified, {} failed",
                        stats.uploaded, stats.verified, stats.failed
                    ),
                );
            }

            let failed = summary.total_failed();
            let (status, exit_code, severity) = if failed == 0 {
                ("success", 0, Severity::Info)
            } else {
                ("partial", 1, Severity::Warning)
            };
            let message = format!(
                "Replication of {} artifact(s) to {} region(s): {} failure(s)",
                summary.artifacts,
                summary.per_region.len(),
                failed
            );
            let report = reporter.finish(status, Vec::new(), false, exit_code);
            finish(config, &notifier, report, &message, severity).await
        }
        Err(e) => {
            let message = format!("Replication aborted: {e}");
            error!("{message}");
            let report = reporter.finish("failed", Vec::new(), false, 1);
            finish(config, &notifier, report, &message, Severity::Critical).await
        }
    }
}

/// `opsbackup basebackup`
pub async fn basebackup_op(config: &Config) -> i32 {
    let notifier = Notifier::new(config.notify.clone(), &config.general.instance);
    let executor = Executor::new(config.general.dry_run);

    let tools: &[&str] = if executor.is_dry_run() { &[] } else { &["pg_basebackup"] };
    if let Err(e) = preflight::check(tools, &config.general.backup_dir, config.general.min_free_bytes) {
        error!(error = %e, "Preflight failed");
        return 1;
    }

    let _lock = match RunLock::acquire(&config.lock_path()) {
        Ok(lock) => lock,
        Err(e) => {
            error!(error = %e, "Another run is in progress");
            return 1;
        }
    };

    let mut reporter = RunReporter::new("basebackup", &config.general.instance);
    let token = timestamp_token(Utc::now());
    let result: Result<_> = reporter
        .step(
            "pg_basebackup",
            basebackup::run(&executor, &config.database, &config.general.backup_dir, &token),
        )
        .await;

    match result {
        Ok(dest) => {
            let message = match dest {
                Some(path) => format!("Base backup written to {}", path.display()),
                None => "Base backup skipped (dry-run)".to_string(),
            };
            info!("{message}");
            let report = reporter.finish("success", Vec::new(), false, 0);
            finish(config, &notifier, report, &message, Severity::Info).await
        }
        Err(e) => {
            let message = format!("Base backup failed: {e}");
            error!("{message}");
            let report = reporter.finish("failed", Vec::new(), false, 1);
            finish(config, &notifier, report, &message, Severity::Critical).await
        }
    }
}
