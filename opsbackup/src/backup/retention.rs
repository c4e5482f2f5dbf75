//! Retention cleanup for the backup directory.
//!
//! Deletes artifacts and manifests whose embedded timestamp is older than
//! the retention window. Name-based ageing keeps the pass deterministic
//! and idempotent; files without a parseable timestamp are left alone.

use crate::error::Result;
use crate::utils::parse_timestamp_token;
use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use tracing::info;

/// Remove expired artifacts. Returns the deleted paths.
pub fn cleanup(dir: &Path, retention_days: i64, now: DateTime<Utc>) -> Result<Vec<PathBuf>> {
    let cutoff = now - Duration::days(retention_days);
    let mut deleted = Vec::new();

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stamp) = parse_timestamp_token(&name) else {
            continue;
        };
        if stamp < cutoff {
            std::fs::remove_file(entry.path())?;
            info!(artifact = %name, age_days = (now - stamp).num_days(), "Removed expired artifact");
            deleted.push(entry.path());
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_deletes_only_expired_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        let old = (now - Duration::days(40)).format("%Y%m%dT%H%M%S").to_string();
        let recent = (now - Duration::days(2)).format("%Y%m%dT%H%M%S").to_string();

        touch(dir.path(), &format!("db_{old}.dump.gz"));
        touch(dir.path(), &format!("db_{recent}.dump.gz"));
        touch(dir.path(), &format!("manifest_{old}.json"));
        touch(dir.path(), "README.txt");

        let deleted = cleanup(dir.path(), 30, now).unwrap();
        assert_eq!(deleted.len(), 2);
        assert!(dir.path().join(format!("db_{recent}.dump.gz")).exists());
        assert!(dir.path().join("README.txt").exists());

        // Second pass deletes nothing further
        let deleted_again = cleanup(dir.path(), 30, now).unwrap();
        assert!(deleted_again.is_empty());
    }

    #[test]
    fn test_unparseable_names_survive() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "db_notadate.dump.gz");
        touch(dir.path(), "opsbackup.lock");

        let deleted = cleanup(dir.path(), 0, Utc::now()).unwrap();
        assert!(deleted.is_empty());
    }
}
