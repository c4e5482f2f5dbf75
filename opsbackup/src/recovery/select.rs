//! Recovery-point selection.

use crate::backup::manifest::ArtifactKind;
use crate::error::{OpsError, Result};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

/// Pick the artifact to restore for one component.
///
/// `recovery_point` is either `latest` (newest matching artifact by
/// mtime, file name as tie-break) or a token that must appear in the
/// file name, e.g. a timestamp fragment an operator copied from a
/// manifest. No match is a hard error.
pub fn select_backup(dir: &Path, kind: ArtifactKind, recovery_point: &str) -> Result<PathBuf> {
    let mut candidates: Vec<(SystemTime, String, PathBuf)> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !kind.matches(&name) {
                return None;
            }
            let mtime = entry.metadata().ok()?.modified().ok()?;
            Some((mtime, name, entry.path()))
        })
        .collect();

    if recovery_point != "latest" {
        candidates.retain(|(_, name, _)| name.contains(recovery_point));
    }

    candidates.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

    match candidates.pop() {
        Some((_, name, path)) => {
            info!(artifact = %name, recovery_point = %recovery_point, "Selected recovery point");
            Ok(path)
        }
        None => Err(OpsError::NoBackupFound(format!(
            "{}/{}_* ({recovery_point})",
            dir.display(),
            kind.prefix()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_latest_picks_newest_mtime() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db_20250801T020000.dump.gz");
        std::thread::sleep(std::time::Duration::from_millis(20));
        touch(dir.path(), "db_20250806T020000.dump.gz");
        std::thread::sleep(std::time::Duration::from_millis(20));
        touch(dir.path(), "db_20250807T020000.dump.gz");
        // Non-matching noise
        touch(dir.path(), "redis_20250808T020000.rdb.gz");
        touch(dir.path(), "manifest_20250807T020000.json");

        let selected = select_backup(dir.path(), ArtifactKind::Database, "latest").unwrap();
        assert!(selected.ends_with("db_20250807T020000.dump.gz"));
    }

    #[test]
    fn test_token_selection() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db_20250806T020000.dump.gz");
        touch(dir.path(), "db_20250807T020000.dump.gz");

        let selected = select_backup(dir.path(), ArtifactKind::Database, "20250806").unwrap();
        assert!(selected.ends_with("db_20250806T020000.dump.gz"));
    }

    #[test]
    fn test_no_match_is_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db_20250806T020000.dump.gz");

        let err = select_backup(dir.path(), ArtifactKind::Database, "19990101").unwrap_err();
        assert!(matches!(err, OpsError::NoBackupFound(_)));

        let err = select_backup(dir.path(), ArtifactKind::Files, "latest").unwrap_err();
        assert!(matches!(err, OpsError::NoBackupFound(_)));
    }

    #[test]
    fn test_encrypted_artifacts_are_candidates() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db_20250807T020000.dump.gz.enc");

        let selected = select_backup(dir.path(), ArtifactKind::Database, "latest").unwrap();
        assert!(selected.ends_with("db_20250807T020000.dump.gz.enc"));
    }
}
