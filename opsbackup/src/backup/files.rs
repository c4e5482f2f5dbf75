//! Application-files component — tars the configured directories.

use crate::config::FilesConfig;
use crate::error::Result;
use crate::exec::{CommandSpec, Executor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const TAR_TIMEOUT_SECS: u64 = 3600;

/// Archive the configured application paths into `files_<token>.tar.gz`.
///
/// Paths that don't exist are skipped with a warning; if none exist the
/// component is skipped entirely. Returns `None` when skipped or dry-run.
pub async fn archive(
    executor: &Executor,
    files: &FilesConfig,
    dir: &Path,
    token: &str,
) -> Result<Option<PathBuf>> {
    let mut present: Vec<String> = Vec::new();
    for path in &files.paths {
        if files.root.join(path).exists() || executor.is_dry_run() {
            present.push(path.to_string_lossy().into_owned());
        } else {
            warn!(path = %path.display(), root = %files.root.display(), "Skipping missing path");
        }
    }

    if present.is_empty() {
        warn!("No application paths present, skipping files component");
        return Ok(None);
    }

    let dest = dir.join(format!("files_{token}.tar.gz"));
    let spec = CommandSpec::new("tar", Duration::from_secs(TAR_TIMEOUT_SECS))
        .arg("-czf")
        .arg(dest.to_string_lossy().into_owned())
        .arg("-C")
        .arg(files.root.to_string_lossy().into_owned())
        .args(present);

    let out = executor.run(&spec).await?;
    if out.skipped {
        return Ok(None);
    }

    info!(artifact = %dest.display(), "Files archive complete");
    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archives_existing_paths() {
        let root = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("uploads")).unwrap();
        std::fs::write(root.path().join("uploads/a.png"), b"img").unwrap();

        let files = FilesConfig {
            root: root.path().to_path_buf(),
            paths: vec![PathBuf::from("uploads"), PathBuf::from("missing")],
            critical_paths: vec![],
        };

        let executor = Executor::new(false);
        let artifact = archive(&executor, &files, backups.path(), "20250807T020000")
            .await
            .unwrap()
            .unwrap();

        assert!(artifact.exists());
        assert!(artifact.metadata().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn test_skips_when_nothing_to_archive() {
        let root = tempfile::tempdir().unwrap();
        let backups = tempfile::tempdir().unwrap();

        let files = FilesConfig {
            root: root.path().to_path_buf(),
            paths: vec![PathBuf::from("missing")],
            critical_paths: vec![],
        };

        let executor = Executor::new(false);
        let artifact = archive(&executor, &files, backups.path(), "20250807T020000")
            .await
            .unwrap();
        assert!(artifact.is_none());
    }
}
