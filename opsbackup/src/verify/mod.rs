//! Artifact verification.
//!
//! Every artifact must be non-empty and pass its format's integrity
//! check: a full gzip stream decode for compressed artifacts, plus a
//! `pg_restore --list` structural read for database dumps. Optionally a
//! decrypt-and-restore probe against a scratch database confirms actual
//! restorability.

use crate::backup::encrypt;
use crate::backup::manifest::ArtifactKind;
use crate::config::Config;
use crate::error::Result;
use crate::exec::{CommandSpec, Executor};
use crate::utils::gzip;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Result of verifying one artifact.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub path: PathBuf,
    pub passed: bool,
    pub detail: String,
}

impl VerifyOutcome {
    fn pass(path: &Path, detail: impl Into<String>) -> Self {
        VerifyOutcome {
            path: path.to_path_buf(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(path: &Path, detail: impl Into<String>) -> Self {
        VerifyOutcome {
            path: path.to_path_buf(),
            passed: false,
            detail: detail.into(),
        }
    }
}

fn is_database_dump(name: &str) -> bool {
    ArtifactKind::Database.matches(name)
}

/// Verify a single artifact. Never returns `Err` for a failed check —
/// failures are data, carried in the outcome; only unexpected I/O
/// against the scratch space escapes as an error.
pub async fn verify_artifact(
    executor: &Executor,
    config: &Config,
    path: &Path,
) -> Result<VerifyOutcome> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => return Ok(VerifyOutcome::fail(path, format!("stat failed: {e}"))),
    };
    if meta.len() == 0 {
        return Ok(VerifyOutcome::fail(path, "artifact is empty"));
    }

    let tmp_dir = config.general.backup_dir.join("tmp");
    std::fs::create_dir_all(&tmp_dir)?;

    // Encrypted artifacts are decrypted into scratch space first; without
    // a key the size check is all we can do.
    let mut scratch: Vec<PathBuf> = Vec::new();
    let plain_path = if name.ends_with(".enc") {
        if !config.encryption.enabled {
            return Ok(VerifyOutcome::pass(
                path,
                "encrypted and no key configured, size check only",
            ));
        }
        let decrypted = tmp_dir.join(name.trim_end_matches(".enc"));
        if let Err(e) =
            encrypt::decrypt(executor, path, &decrypted, &config.encryption.key_file).await
        {
            return Ok(VerifyOutcome::fail(path, format!("decrypt failed: {e}")));
        }
        if executor.is_dry_run() {
            return Ok(VerifyOutcome::pass(path, "dry-run: decrypt skipped"));
        }
        scratch.push(decrypted.clone());
        decrypted
    } else {
        path.to_path_buf()
    };

    let outcome = check_plain(executor, config, path, &plain_path, &tmp_dir).await;

    for file in scratch {
        let _ = std::fs::remove_file(file);
    }
    outcome
}

async fn check_plain(
    executor: &Executor,
    config: &Config,
    original: &Path,
    plain: &Path,
    tmp_dir: &Path,
) -> Result<VerifyOutcome> {
    if let Err(e) = gzip::check_integrity(plain).await {
        return Ok(VerifyOutcome::fail(original, format!("gzip check failed: {e}")));
    }

    let plain_name = plain
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !is_database_dump(&plain_name) {
        return Ok(VerifyOutcome::pass(original, "gzip integrity ok"));
    }

    // Database dumps additionally get a structural read of the TOC.
    let dump = tmp_dir.join(plain_name.trim_end_matches(".gz"));
    gzip::decompress_file(plain, &dump).await?;

    let list = CommandSpec::new("pg_restore", Duration::from_secs(config.database.timeout_secs))
        .arg("--list")
        .arg(dump.to_string_lossy().into_owned());
    let result = executor.run(&list).await;

    let outcome = match result {
        Ok(out) if out.skipped => VerifyOutcome::pass(original, "dry-run: structural check skipped"),
        Ok(_) => {
            if config.recovery.probe_restore {
                probe_restore(executor, config, &dump).await?
            } else {
                VerifyOutcome::pass(original, "gzip + pg_restore --list ok")
            }
        }
        Err(e) => VerifyOutcome::fail(original, format!("pg_restore --list failed: {e}")),
    };

    let _ = std::fs::remove_file(&dump);
    Ok(outcome)
}

/// Restore the dump into a scratch database and drop it again.
async fn probe_restore(
    executor: &Executor,
    config: &Config,
    dump: &Path,
) -> Result<VerifyOutcome> {
    let db = &config.database;
    let scratch = &config.recovery.scratch_db;
    let timeout = Duration::from_secs(db.timeout_secs);

    let conn_args = |spec: CommandSpec| {
        spec.arg("--host")
            .arg(&db.host)
            .arg("--port")
            .arg(db.port.to_string())
            .arg("--username")
            .arg(&db.user)
            .arg("--no-password")
    };

    let drop = conn_args(CommandSpec::new("dropdb", timeout))
        .arg("--if-exists")
        .arg(scratch);
    let create = conn_args(CommandSpec::new("createdb", timeout)).arg(scratch);
    let restore = conn_args(CommandSpec::new("pg_restore", timeout))
        .arg("--no-owner")
        .arg("--dbname")
        .arg(scratch)
        .arg(dump.to_string_lossy().into_owned());

    executor.run(&drop).await?;
    executor.run(&create).await?;
    let restored = executor.run(&restore).await;
    // Drop the scratch database regardless of how the restore went
    if let Err(e) = executor.run(&drop).await {
        warn!(scratch = %scratch, error = %e, "Failed to drop scratch database");
    }

    match restored {
        Ok(_) => Ok(VerifyOutcome::pass(dump, "scratch restore ok")),
        Err(e) => Ok(VerifyOutcome::fail(dump, format!("scratch restore failed: {e}"))),
    }
}

/// Verify every artifact in the backup directory.
///
/// Returns the per-artifact outcomes and the aggregate
/// `verification_failed` flag.
pub async fn verify_all(
    executor: &Executor,
    config: &Config,
) -> Result<(Vec<VerifyOutcome>, bool)> {
    let mut outcomes = Vec::new();

    let mut names: Vec<PathBuf> = std::fs::read_dir(&config.general.backup_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| {
                    let name = n.to_string_lossy();
                    ArtifactKind::all().iter().any(|k| k.matches(&name))
                })
                .unwrap_or(false)
        })
        .collect();
    names.sort();

    for path in names {
        let outcome = verify_artifact(executor, config, &path).await?;
        if outcome.passed {
            info!(artifact = %outcome.path.display(), detail = %outcome.detail, "Verified");
        } else {
            warn!(artifact = %outcome.path.display(), detail = %outcome.detail, "Verification FAILED");
        }
        outcomes.push(outcome);
    }

    let failed = outcomes.iter().any(|o| !o.passed);
    Ok((outcomes, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::gzip::compress_file;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.general.backup_dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_empty_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let artifact = dir.path().join("files_20250807T020000.tar.gz");
        std::fs::write(&artifact, b"").unwrap();

        let outcome = verify_artifact(&Executor::new(false), &config, &artifact)
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("empty"));
    }

    #[tokio::test]
    async fn test_corrupt_gzip_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let artifact = dir.path().join("files_20250807T020000.tar.gz");
        std::fs::write(&artifact, b"not gzip at all").unwrap();

        let outcome = verify_artifact(&Executor::new(false), &config, &artifact)
            .await
            .unwrap();
        assert!(!outcome.passed);
        assert!(outcome.detail.contains("gzip"));
    }

    #[tokio::test]
    async fn test_valid_non_database_artifact_passes() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let plain = dir.path().join("payload");
        std::fs::write(&plain, b"tar bytes").unwrap();
        let artifact = dir.path().join("files_20250807T020000.tar.gz");
        compress_file(&plain, &artifact).await.unwrap();

        let outcome = verify_artifact(&Executor::new(false), &config, &artifact)
            .await
            .unwrap();
        assert!(outcome.passed, "{}", outcome.detail);
    }

    #[tokio::test]
    async fn test_verify_all_aggregates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let plain = dir.path().join("payload");
        std::fs::write(&plain, b"tar bytes").unwrap();
        compress_file(&plain, &dir.path().join("files_20250807T020000.tar.gz"))
            .await
            .unwrap();
        std::fs::write(dir.path().join("redis_20250807T020000.rdb.gz"), b"junk").unwrap();

        let (outcomes, failed) = verify_all(&Executor::new(false), &config).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(failed);
    }
}
