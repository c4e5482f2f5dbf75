//! Point-in-time-recovery base backup via `pg_basebackup`.
//!
//! Produces a tar-format, gzip-compressed base backup with streamed WAL
//! under `basebackup_<token>/`. WAL archiving itself is configured on the
//! database server; this only takes the base.

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::exec::{CommandSpec, Executor};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub async fn run(
    executor: &Executor,
    db: &DatabaseConfig,
    dir: &Path,
    token: &str,
) -> Result<Option<PathBuf>> {
    let dest = dir.join(format!("basebackup_{token}"));
    let spec = CommandSpec::new("pg_basebackup", Duration::from_secs(db.timeout_secs))
        .arg("--host")
        .arg(&db.host)
        .arg("--port")
        .arg(db.port.to_string())
        .arg("--username")
        .arg(&db.user)
        .arg("--no-password")
        .arg("--pgdata")
        .arg(dest.to_string_lossy().into_owned())
        .arg("--format=tar")
        .arg("--gzip")
        .arg("--wal-method=stream")
        .arg("--checkpoint=fast");

    let out = executor.run(&spec).await?;
    if out.skipped {
        return Ok(None);
    }

    info!(dest = %dest.display(), "Base backup complete");
    Ok(Some(dest))
}
