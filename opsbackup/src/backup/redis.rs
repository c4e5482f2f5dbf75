//! Redis snapshot component.
//!
//! Triggers a `BGSAVE`, waits for `LASTSAVE` to advance, then gzips the
//! resulting RDB file into the backup directory.

use crate::config::RedisConfig;
use crate::error::{OpsError, Result};
use crate::exec::{CommandSpec, Executor};
use crate::utils::gzip;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

fn redis_cmd(redis: &RedisConfig, args: &[&str]) -> CommandSpec {
    CommandSpec::new("redis-cli", Duration::from_secs(30))
        .arg("-h")
        .arg(&redis.host)
        .arg("-p")
        .arg(redis.port.to_string())
        .args(args.iter().copied())
}

async fn lastsave(executor: &Executor, redis: &RedisConfig) -> Result<Option<i64>> {
    let out = executor.run(&redis_cmd(redis, &["LASTSAVE"])).await?;
    if out.skipped {
        return Ok(None);
    }
    out.stdout
        .trim()
        .parse::<i64>()
        .map(Some)
        .map_err(|_| OpsError::Verification(format!("unparseable LASTSAVE reply: {}", out.stdout.trim())))
}

/// Snapshot Redis into `redis_<token>.rdb.gz`. Returns `None` under dry-run.
pub async fn snapshot(
    executor: &Executor,
    redis: &RedisConfig,
    dir: &Path,
    token: &str,
) -> Result<Option<PathBuf>> {
    let Some(before) = lastsave(executor, redis).await? else {
        return Ok(None);
    };

    executor.run(&redis_cmd(redis, &["BGSAVE"])).await?;
    debug!(lastsave = before, "BGSAVE triggered, polling LASTSAVE");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(redis.bgsave_timeout_secs);
    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        match lastsave(executor, redis).await? {
            Some(now) if now > before => break,
            Some(_) => {}
            None => return Ok(None),
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(OpsError::CommandTimeout {
                program: "redis-cli BGSAVE".to_string(),
                seconds: redis.bgsave_timeout_secs,
            });
        }
    }

    if !redis.rdb_path.exists() {
        return Err(OpsError::ArtifactNotFound(redis.rdb_path.clone()));
    }

    let dest = dir.join(format!("redis_{token}.rdb.gz"));
    gzip::compress_file(&redis.rdb_path, &dest).await?;

    info!(
        artifact = %dest.display(),
        source = %redis.rdb_path.display(),
        "Redis snapshot complete"
    );
    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_short_circuits_before_bgsave() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Executor::new(true);
        let redis = RedisConfig::default();

        let result = snapshot(&executor, &redis, dir.path(), "20250807T020000")
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
