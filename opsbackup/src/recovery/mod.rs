//! Disaster-recovery orchestrator.
//!
//! Runs the restore pipeline as a fixed state sequence:
//! `validate → select_backup → snapshot_current → stop_services → restore
//! → start_services → post_validate → {success | rollback}`.
//!
//! Terminal states map to process exit codes: SUCCESS=0, FAILED=1,
//! ROLLED_BACK=2. A rollback is only possible when `snapshot_current`
//! captured enough state; otherwise a late failure is reported as an
//! unrecoverable FAILED, never silently half-restored.

pub mod rollback;
pub mod select;

use crate::backup::encrypt;
use crate::backup::manifest::ArtifactKind;
use crate::config::Config;
use crate::error::{OpsError, Result};
use crate::exec::{CommandSpec, Executor};
use crate::preflight;
use crate::report::{RunReporter, StepStatus};
use crate::utils::{gzip, timestamp_token};
use chrono::Utc;
use rollback::RollbackPoint;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

const SERVICE_TIMEOUT_SECS: u64 = 120;

/// What to restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Scenario {
    Database,
    Files,
    Full,
}

impl Scenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::Database => "database",
            Scenario::Files => "files",
            Scenario::Full => "full",
        }
    }
}

/// Terminal state of a recovery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Success,
    Failed,
    RolledBack,
}

impl RecoveryOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RecoveryOutcome::Success => 0,
            RecoveryOutcome::Failed => 1,
            RecoveryOutcome::RolledBack => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::Success => "success",
            RecoveryOutcome::Failed => "failed",
            RecoveryOutcome::RolledBack => "rolled_back",
        }
    }
}

/// Artifacts chosen for the restore.
#[derive(Debug)]
struct Selection {
    database: Option<PathBuf>,
    files: Option<PathBuf>,
}

fn select_artifacts(config: &Config, scenario: Scenario) -> Result<Selection> {
    let dir = &config.general.backup_dir;
    let point = &config.recovery.recovery_point;

    let database = if matches!(scenario, Scenario::Database | Scenario::Full) {
        Some(select::select_backup(dir, ArtifactKind::Database, point)?)
    } else {
        None
    };
    let files = if matches!(scenario, Scenario::Files | Scenario::Full) {
        Some(select::select_backup(dir, ArtifactKind::Files, point)?)
    } else {
        None
    };

    Ok(Selection { database, files })
}

fn required_tools(config: &Config, scenario: Scenario) -> Vec<&'static str> {
    let mut tools = vec!["systemctl"];
    if matches!(scenario, Scenario::Database | Scenario::Full) {
        tools.extend(["pg_dump", "pg_restore", "dropdb", "createdb", "psql"]);
    }
    if matches!(scenario, Scenario::Files | Scenario::Full) {
        tools.push("tar");
    }
    if config.encryption.enabled {
        tools.push("openssl");
    }
    tools
}

fn service_spec(action: &str, unit: &str) -> CommandSpec {
    CommandSpec::new("systemctl", Duration::from_secs(SERVICE_TIMEOUT_SECS))
        .arg(action)
        .arg(unit)
}

async fn stop_services(executor: &Executor, config: &Config) -> Result<()> {
    for unit in &config.services.units {
        executor.run(&service_spec("stop", unit)).await?;
        info!(unit = %unit, "Service stopped");
    }
    Ok(())
}

async fn start_services(executor: &Executor, config: &Config) -> Result<()> {
    for unit in &config.services.units {
        executor.run(&service_spec("start", unit)).await?;
        info!(unit = %unit, "Service started");
    }
    Ok(())
}

fn psql_spec(config: &Config, timeout: Duration) -> CommandSpec {
    let db = &config.database;
    CommandSpec::new("psql", timeout)
        .arg("--host")
        .arg(&db.host)
        .arg("--port")
        .arg(db.port.to_string())
        .arg("--username")
        .arg(&db.user)
        .arg("--no-password")
        .arg("--dbname")
        .arg(&db.name)
}

/// Restore one database dump (possibly encrypted) over the target
/// database: drop, create, `pg_restore`.
async fn restore_database_from(executor: &Executor, config: &Config, artifact: &Path) -> Result<()> {
    if executor.is_dry_run() {
        info!(artifact = %artifact.display(), "dry-run: skipping database restore");
        return Ok(());
    }

    let db = &config.database;
    let timeout = Duration::from_secs(db.timeout_secs);
    let tmp_dir = config.general.backup_dir.join("tmp");
    std::fs::create_dir_all(&tmp_dir)?;

    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    // Peel encryption, then compression, into scratch space.
    let mut scratch: Vec<PathBuf> = Vec::new();
    let compressed = if name.ends_with(".enc") {
        if !config.encryption.enabled {
            return Err(OpsError::Restore(format!(
                "{name} is encrypted but no encryption key is configured"
            )));
        }
        let plain = tmp_dir.join(name.trim_end_matches(".enc"));
        encrypt::decrypt(executor, artifact, &plain, &config.encryption.key_file).await?;
        scratch.push(plain.clone());
        plain
    } else {
        artifact.to_path_buf()
    };

    let dump = tmp_dir.join(
        compressed
            .file_name()
            .map(|n| n.to_string_lossy().trim_end_matches(".gz").to_string())
            .unwrap_or_default(),
    );
    gzip::decompress_file(&compressed, &dump).await?;
    scratch.push(dump.clone());

    let conn_args = |spec: CommandSpec| {
        spec.arg("--host")
            .arg(&db.host)
            .arg("--port")
            .arg(db.port.to_string())
            .arg("--username")
            .arg(&db.user)
            .arg("--no-password")
    };

    let result = async {
        executor
            .run(&conn_args(CommandSpec::new("dropdb", timeout)).arg("--if-exists").arg(&db.name))
            .await?;
        executor
            .run(&conn_args(CommandSpec::new("createdb", timeout)).arg(&db.name))
            .await?;
        executor
            .run(
                &conn_args(CommandSpec::new("pg_restore", timeout))
                    .arg("--no-owner")
                    .arg("--dbname")
                    .arg(&db.name)
                    .arg(dump.to_string_lossy().into_owned()),
            )
            .await?;
        Ok(())
    }
    .await;

    for file in scratch {
        let _ = std::fs::remove_file(file);
    }
    result
}

/// Unpack a files archive over the application root.
async fn restore_files_from(executor: &Executor, config: &Config, artifact: &Path) -> Result<()> {
    std::fs::create_dir_all(&config.files.root).ok();
    let spec = CommandSpec::new("tar", Duration::from_secs(3600))
        .arg("-xzf")
        .arg(artifact.to_string_lossy().into_owned())
        .arg("-C")
        .arg(config.files.root.to_string_lossy().into_owned());
    executor.run(&spec).await?;
    Ok(())
}

async fn do_restore(
    executor: &Executor,
    config: &Config,
    selection: &Selection,
) -> Result<()> {
    // Sequential, not transactional: a files failure after a database
    // success leaves a partial restore, which is exactly what the
    // rollback path exists to revert.
    if let Some(db_artifact) = &selection.database {
        restore_database_from(executor, config, db_artifact).await?;
        info!(artifact = %db_artifact.display(), "Database restored");
    }
    if let Some(files_artifact) = &selection.files {
        restore_files_from(executor, config, files_artifact).await?;
        info!(artifact = %files_artifact.display(), "Files restored");
    }
    Ok(())
}

async fn post_validate(executor: &Executor, config: &Config, scenario: Scenario) -> Result<()> {
    let timeout = Duration::from_secs(60);

    if matches!(scenario, Scenario::Database | Scenario::Full) {
        let count_spec = psql_spec(config, timeout).arg("-tAc").arg(
            "SELECT count(*) FROM information_schema.tables \
             WHERE table_schema NOT IN ('pg_catalog', 'information_schema')",
        );
        let out = executor.run(&count_spec).await?;
        if !out.skipped {
            let tables: u64 = out.stdout.trim().parse().map_err(|_| {
                OpsError::Verification(format!("unparseable table count: {}", out.stdout.trim()))
            })?;
            if tables == 0 {
                return Err(OpsError::Verification(
                    "restored database contains no tables".into(),
                ));
            }
            info!(tables, "Post-restore table count ok");
        }

        let sample = psql_spec(config, timeout)
            .arg("-tAc")
            .arg(&config.recovery.sample_query);
        executor.run(&sample).await?;
    }

    if matches!(scenario, Scenario::Files | Scenario::Full) && !executor.is_dry_run() {
        for critical in &config.files.critical_paths {
            let path = config.files.root.join(critical);
            if !path.exists() {
                return Err(OpsError::Verification(format!(
                    "critical path missing after restore: {}",
                    path.display()
                )));
            }
        }
    }

    Ok(())
}

async fn do_rollback(
    executor: &Executor,
    config: &Config,
    point: &RollbackPoint,
) -> Result<()> {
    if let Some(dump) = &point.database_dump {
        restore_database_from(executor, config, dump).await?;
        info!("Database rolled back to pre-recovery snapshot");
    }
    if let Some(archive) = &point.files_archive {
        restore_files_from(executor, config, archive).await?;
        info!("Files rolled back to pre-recovery snapshot");
    }
    Ok(())
}

/// After a mid-pipeline failure: roll back if the snapshot allows it,
/// otherwise report the run as unrecoverable.
async fn fail_with_rollback(
    executor: &Executor,
    config: &Config,
    scenario: Scenario,
    point: RollbackPoint,
    reporter: &mut RunReporter,
) -> RecoveryOutcome {
    if !point.covers(scenario) {
        reporter.record(
            "rollback",
            StepStatus::Failed,
            "no usable rollback point, partial restore left in place",
        );
        error!("Recovery failed with no rollback point; manual intervention required");
        return RecoveryOutcome::Failed;
    }

    match reporter.step("rollback", do_rollback(executor, config, &point)).await {
        Ok(()) => {
            if let Err(e) = start_services(executor, config).await {
                warn!(error = %e, "Service start failed after rollback");
            }
            point.remove();
            RecoveryOutcome::RolledBack
        }
        Err(e) => {
            error!(error = %e, "Rollback itself failed; manual intervention required");
            RecoveryOutcome::Failed
        }
    }
}

/// Run the recovery pipeline to a terminal state.
pub async fn run(config: &Config, scenario: Scenario, reporter: &mut RunReporter) -> RecoveryOutcome {
    let executor = Executor::new(config.general.dry_run);
    info!(
        scenario = scenario.as_str(),
        recovery_point = %config.recovery.recovery_point,
        dry_run = executor.is_dry_run(),
        "Starting disaster recovery"
    );

    // validate — under dry-run the plan must be previewable on machines
    // without the production toolchain, so tool resolution is skipped.
    let tools = if executor.is_dry_run() {
        Vec::new()
    } else {
        required_tools(config, scenario)
    };
    let validated = reporter
        .step("validate", async {
            preflight::check(&tools, &config.general.backup_dir, config.general.min_free_bytes)
        })
        .await;
    if validated.is_err() {
        return RecoveryOutcome::Failed;
    }

    // select_backup
    let selection = match reporter
        .step("select_backup", async { select_artifacts(config, scenario) })
        .await
    {
        Ok(s) => s,
        Err(_) => return RecoveryOutcome::Failed,
    };
    check_rpo(config, &selection);
    let recovery_started = std::time::Instant::now();

    // snapshot_current — best-effort
    let token = timestamp_token(Utc::now());
    let point = match rollback::snapshot(&executor, config, scenario, &token).await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "Rollback snapshot failed entirely");
            RollbackPoint::default()
        }
    };
    reporter.record(
        "snapshot_current",
        if point.covers(scenario) { StepStatus::Ok } else { StepStatus::Skipped },
        if point.covers(scenario) {
            "rollback point captured"
        } else {
            "no rollback point; a late failure will be unrecoverable"
        },
    );

    // stop_services
    if reporter
        .step("stop_services", stop_services(&executor, config))
        .await
        .is_err()
    {
        // Nothing destructive has happened yet; just try to leave
        // services running.
        if let Err(e) = start_services(&executor, config).await {
            warn!(error = %e, "Service start failed after aborted recovery");
        }
        point.remove();
        return RecoveryOutcome::Failed;
    }

    // restore
    if reporter
        .step("restore", do_restore(&executor, config, &selection))
        .await
        .is_err()
    {
        return fail_with_rollback(&executor, config, scenario, point, reporter).await;
    }

    // start_services
    if reporter
        .step("start_services", start_services(&executor, config))
        .await
        .is_err()
    {
        return fail_with_rollback(&executor, config, scenario, point, reporter).await;
    }

    // post_validate
    if reporter
        .step("post_validate", post_validate(&executor, config, scenario))
        .await
        .is_err()
    {
        return fail_with_rollback(&executor, config, scenario, point, reporter).await;
    }

    point.remove();
    let elapsed_minutes = recovery_started.elapsed().as_secs() as i64 / 60;
    if elapsed_minutes > config.recovery.rto_minutes {
        warn!(
            elapsed_minutes,
            rto_minutes = config.recovery.rto_minutes,
            "Recovery exceeded the RTO"
        );
    }
    info!(scenario = scenario.as_str(), "Disaster recovery complete");
    RecoveryOutcome::Success
}

/// Warn when the chosen backup is older than the RPO allows.
fn check_rpo(config: &Config, selection: &Selection) {
    for artifact in [&selection.database, &selection.files].into_iter().flatten() {
        let Ok(modified) = std::fs::metadata(artifact).and_then(|m| m.modified()) else {
            continue;
        };
        let age = modified.elapsed().unwrap_or_default();
        let age_hours = age.as_secs() as i64 / 3600;
        if age_hours > config.recovery.rpo_hours {
            warn!(
                artifact = %artifact.display(),
                age_hours,
                rpo_hours = config.recovery.rpo_hours,
                "Selected backup exceeds the RPO data-loss window"
            );
        }
    }
}
