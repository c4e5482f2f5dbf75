//! PostgreSQL dump component.

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::exec::{CommandSpec, Executor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Dump the database with `pg_dump --format=custom`, gzip-streamed to
/// `db_<token>.dump.gz`. Returns `None` under dry-run.
///
/// Credentials are whatever the environment provides (`PGPASSWORD`,
/// `~/.pgpass`), same as the cron jobs always ran with.
pub async fn dump(
    executor: &Executor,
    db: &DatabaseConfig,
    dir: &Path,
    token: &str,
) -> Result<Option<PathBuf>> {
    let dest = dir.join(format!("db_{token}.dump.gz"));
    let spec = CommandSpec::new("pg_dump", Duration::from_secs(db.timeout_secs))
        .arg("--format=custom")
        .arg("--host")
        .arg(&db.host)
        .arg("--port")
        .arg(db.port.to_string())
        .arg("--username")
        .arg(&db.user)
        .arg("--no-password")
        .arg(&db.name);

    let out = executor.run_to_gzip(&spec, &dest).await?;
    if out.skipped {
        return Ok(None);
    }

    info!(
        artifact = %dest.display(),
        database = %db.name,
        "Database dump complete"
    );
    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_produces_no_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Executor::new(true);
        let db = DatabaseConfig::default();

        let result = dump(&executor, &db, dir.path(), "20250807T020000")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!dir.path().join("db_20250807T020000.dump.gz").exists());
    }
}
