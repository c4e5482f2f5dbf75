//! Backup orchestration.
//!
//! Sequences the component backups, encrypts artifacts when configured,
//! verifies everything produced, writes the manifest, and applies
//! retention. Any component failure aborts the run; verification failure
//! is a run failure too, so an exit code of 0 means every artifact in the
//! manifest exists and passed its checks.

pub mod basebackup;
pub mod database;
pub mod encrypt;
pub mod files;
pub mod manifest;
pub mod redis;
pub mod retention;

use crate::config::Config;
use crate::error::{OpsError, Result};
use crate::exec::Executor;
use crate::report::{RunReporter, StepStatus};
use crate::utils::{checksum, timestamp_token};
use crate::verify;
use chrono::Utc;
use manifest::{Artifact, ArtifactKind, ComponentFlags, Manifest};
use std::path::PathBuf;
use tracing::info;

/// Everything a backup run produced.
#[derive(Debug)]
pub struct BackupOutcome {
    pub artifacts: Vec<Artifact>,
    pub manifest_path: Option<PathBuf>,
}

async fn finalize_artifact(
    executor: &Executor,
    config: &Config,
    path: PathBuf,
    kind: ArtifactKind,
) -> Result<Artifact> {
    let (path, encrypted) = if config.encryption.enabled {
        let enc = encrypt::encrypt(executor, &path, &config.encryption.key_file).await?;
        (enc, true)
    } else {
        (path, false)
    };

    let size_bytes = std::fs::metadata(&path)?.len();
    let sha256 = checksum::sha256_file(&path).await?;

    Ok(Artifact {
        path,
        kind,
        size_bytes,
        sha256,
        encrypted,
    })
}

/// Run the selected backup components.
pub async fn run(
    config: &Config,
    components: ComponentFlags,
    reporter: &mut RunReporter,
) -> Result<BackupOutcome> {
    let executor = Executor::new(config.general.dry_run);
    let dir = config.general.backup_dir.clone();
    let token = timestamp_token(Utc::now());
    let mut artifacts: Vec<Artifact> = Vec::new();

    if components.database {
        let produced = reporter
            .step("backup_database", database::dump(&executor, &config.database, &dir, &token))
            .await?;
        match produced {
            Some(path) => {
                let artifact =
                    finalize_artifact(&executor, config, path, ArtifactKind::Database).await?;
                artifacts.push(artifact);
            }
            None => reporter.record("backup_database_artifact", StepStatus::Skipped, "dry-run"),
        }
    }

    if components.redis {
        let produced = reporter
            .step("backup_redis", redis::snapshot(&executor, &config.redis, &dir, &token))
            .await?;
        match produced {
            Some(path) => {
                let artifact =
                    finalize_artifact(&executor, config, path, ArtifactKind::Redis).await?;
                artifacts.push(artifact);
            }
            None => reporter.record("backup_redis_artifact", StepStatus::Skipped, "dry-run"),
        }
    }

    if components.files {
        let produced = reporter
            .step("backup_files", files::archive(&executor, &config.files, &dir, &token))
            .await?;
        match produced {
            Some(path) => {
                let artifact =
                    finalize_artifact(&executor, config, path, ArtifactKind::Files).await?;
                artifacts.push(artifact);
            }
            None => reporter.record(
                "backup_files_artifact",
                StepStatus::Skipped,
                "nothing archived",
            ),
        }
    }

    // Verify what this run produced before publishing a manifest for it.
    let mut verification_failures = Vec::new();
    for artifact in &artifacts {
        let outcome = verify::verify_artifact(&executor, config, &artifact.path).await?;
        let status = if outcome.passed { StepStatus::Ok } else { StepStatus::Failed };
        reporter.record(
            &format!("verify {}", artifact.record().name),
            status,
            outcome.detail.clone(),
        );
        if !outcome.passed {
            verification_failures.push(outcome);
        }
    }
    if !verification_failures.is_empty() {
        return Err(OpsError::Verification(format!(
            "{} artifact(s) failed verification",
            verification_failures.len()
        )));
    }

    let manifest_path = if artifacts.is_empty() {
        None
    } else {
        let manifest = Manifest::new(reporter.run_id(), &config.general.instance, components, &artifacts);
        let path = manifest.write(&dir, &token)?;
        info!(manifest = %path.display(), artifacts = artifacts.len(), "Manifest written");
        Some(path)
    };

    // Retention runs at the end of every backup, same as the nightly job did.
    if !executor.is_dry_run() {
        let deleted = retention::cleanup(&dir, config.general.retention_days, Utc::now())?;
        reporter.record(
            "retention_cleanup",
            StepStatus::Ok,
            format!("{} expired artifact(s) removed", deleted.len()),
        );
    } else {
        reporter.record("retention_cleanup", StepStatus::Skipped, "dry-run");
    }

    Ok(BackupOutcome {
        artifacts,
        manifest_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RunReporter;

    /// Dry-run of a full backup: no artifacts, no manifest, no error.
    #[tokio::test]
    async fn test_dry_run_full_backup_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.general.backup_dir = dir.path().to_path_buf();
        config.general.dry_run = true;

        let mut reporter = RunReporter::new("backup", "test");
        let outcome = run(&config, ComponentFlags::full(), &mut reporter)
            .await
            .unwrap();

        assert!(outcome.artifacts.is_empty());
        assert!(outcome.manifest_path.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    /// A files-only backup against real directories produces a verified
    /// artifact and a manifest referencing it.
    #[tokio::test]
    async fn test_files_backup_writes_manifest() {
        let root = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("uploads")).unwrap();
        std::fs::write(root.path().join("uploads/a.txt"), b"data").unwrap();

        let mut config = Config::default();
        config.general.backup_dir = backups.path().to_path_buf();
        config.files.root = root.path().to_path_buf();
        config.files.paths = vec![PathBuf::from("uploads")];

        let mut reporter = RunReporter::new("backup", "test");
        let flags = ComponentFlags::only(ArtifactKind::Files);
        let outcome = run(&config, flags, &mut reporter).await.unwrap();

        assert_eq!(outcome.artifacts.len(), 1);
        let manifest = Manifest::read(&outcome.manifest_path.unwrap()).unwrap();
        assert_eq!(manifest.artifacts.len(), 1);
        assert!(manifest.components.files);
        assert!(!manifest.components.database);
        assert_eq!(manifest.artifacts[0].sha256.len(), 64);
        assert!(backups.path().join(&manifest.artifacts[0].name).exists());
    }
}
