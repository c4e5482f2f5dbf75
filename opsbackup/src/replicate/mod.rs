//! Cross-region replication of recent artifacts.
//!
//! Every artifact modified inside the replication window is uploaded to
//! each configured S3 region, with fan-out bounded by a semaphore rather
//! than the old backgrounded-subshell-per-region pattern. Replicas are
//! verified by object size plus a locally computed SHA-256 carried in
//! object metadata — ETags are not content hashes for multipart uploads,
//! so they are never compared.

use crate::config::{Config, RegionTarget, ReplicationConfig};
use crate::error::Result;
use crate::exec::{CommandSpec, Executor, RetryPolicy};
use crate::utils::checksum;
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const UPLOAD_RETRY_ATTEMPTS: u32 = 3;
const UPLOAD_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Per-region outcome counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegionStats {
    pub uploaded: usize,
    pub verified: usize,
    pub failed: usize,
}

/// Aggregate of one replication run.
#[derive(Debug)]
pub struct ReplicationSummary {
    pub artifacts: usize,
    pub per_region: BTreeMap<String, RegionStats>,
}

impl ReplicationSummary {
    pub fn total_failed(&self) -> usize {
        self.per_region.values().map(|s| s.failed).sum()
    }
}

/// An artifact slated for replication, hashed once up front.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    name: String,
    size_bytes: u64,
    sha256: String,
}

fn discover(config: &Config) -> Result<Vec<(PathBuf, u64)>> {
    use crate::backup::manifest::ArtifactKind;

    let window = chrono::Duration::hours(config.replication.window_hours);
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(window.num_seconds().max(0) as u64);

    let mut found = Vec::new();
    for entry in std::fs::read_dir(&config.general.backup_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_artifact = ArtifactKind::all().iter().any(|k| k.matches(&name))
            || (name.starts_with("manifest_") && name.ends_with(".json"));
        if !is_artifact {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        if meta.modified()? >= cutoff {
            found.push((entry.path(), meta.len()));
        }
    }
    Ok(found)
}

fn s3_key(region: &RegionTarget, name: &str) -> String {
    if region.prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", region.prefix.trim_end_matches('/'), name)
    }
}

async fn upload_and_verify(
    executor: &Executor,
    replication: &ReplicationConfig,
    region: &RegionTarget,
    candidate: &Candidate,
) -> Result<()> {
    let timeout = Duration::from_secs(replication.upload_timeout_secs);
    let key = s3_key(region, &candidate.name);
    let dest = format!("s3://{}/{}", region.bucket, key);

    let upload = CommandSpec::new("aws", timeout)
        .arg("s3")
        .arg("cp")
        .arg(candidate.path.to_string_lossy().into_owned())
        .arg(&dest)
        .arg("--region")
        .arg(&region.name)
        .arg("--metadata")
        .arg(format!("sha256={}", candidate.sha256))
        .arg("--only-show-errors");
    executor
        .run_with_retry(&upload, RetryPolicy::fixed(UPLOAD_RETRY_ATTEMPTS, UPLOAD_RETRY_DELAY))
        .await?;

    let head = CommandSpec::new("aws", Duration::from_secs(60))
        .arg("s3api")
        .arg("head-object")
        .arg("--bucket")
        .arg(&region.bucket)
        .arg("--key")
        .arg(&key)
        .arg("--region")
        .arg(&region.name);
    let out = executor.run(&head).await?;
    if out.skipped {
        return Ok(());
    }

    verify_head(&out.stdout, candidate)
}

/// Compare `head-object` output against the local artifact.
fn verify_head(head_json: &str, candidate: &Candidate) -> Result<()> {
    use crate::error::OpsError;

    let head: serde_json::Value = serde_json::from_str(head_json)?;
    let remote_size = head.get("ContentLength").and_then(|v| v.as_u64());
    if remote_size != Some(candidate.size_bytes) {
        return Err(OpsError::Verification(format!(
            "{}: replica size {:?} != local {}",
            candidate.name, remote_size, candidate.size_bytes
        )));
    }

    let remote_sha = head
        .get("Metadata")
        .and_then(|m| m.get("sha256"))
        .and_then(|v| v.as_str());
    if remote_sha != Some(candidate.sha256.as_str()) {
        return Err(OpsError::Verification(format!(
            "{}: replica sha256 {:?} != local {}",
            candidate.name, remote_sha, candidate.sha256
        )));
    }

    Ok(())
}

async fn mirror_secondary(executor: &Executor, config: &Config, candidates: &[Candidate]) {
    let replication = &config.replication;
    let timeout = Duration::from_secs(replication.upload_timeout_secs);

    // Secondary providers are best-effort mirrors; failures never fail
    // the run.
    if let Some(container) = &replication.azure_container {
        for candidate in candidates {
            let spec = CommandSpec::new("az", timeout)
                .arg("storage")
                .arg("blob")
                .arg("upload")
                .arg("--container-name")
                .arg(container)
                .arg("--file")
                .arg(candidate.path.to_string_lossy().into_owned())
                .arg("--name")
                .arg(&candidate.name)
                .arg("--overwrite");
            if let Err(e) = executor.run(&spec).await {
                warn!(artifact = %candidate.name, error = %e, "Azure mirror failed");
            }
        }
    }

    if let Some(bucket) = &replication.gcs_bucket {
        for candidate in candidates {
            let spec = CommandSpec::new("gsutil", timeout)
                .arg("cp")
                .arg(candidate.path.to_string_lossy().into_owned())
                .arg(format!("{}/{}", bucket.trim_end_matches('/'), candidate.name));
            if let Err(e) = executor.run(&spec).await {
                warn!(artifact = %candidate.name, error = %e, "GCS mirror failed");
            }
        }
    }
}

/// Replicate recent artifacts to every configured region.
///
/// Individual upload failures are counted, not propagated; the caller
/// decides what a non-zero failure count means for the process exit.
pub async fn run(
    config: &Config,
    executor: &Executor,
    cancel: CancellationToken,
) -> Result<ReplicationSummary> {
    let replication = &config.replication;

    let recent = discover(config)?;
    if recent.is_empty() {
        info!(
            window_hours = replication.window_hours,
            "No recent artifacts to replicate"
        );
        return Ok(ReplicationSummary {
            artifacts: 0,
            per_region: BTreeMap::new(),
        });
    }

    // Hash once per artifact, not once per region upload.
    let mut candidates = Vec::with_capacity(recent.len());
    for (path, size_bytes) in recent {
        let sha256 = checksum::sha256_file(&path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        candidates.push(Candidate {
            path,
            name,
            size_bytes,
            sha256,
        });
    }

    info!(
        artifacts = candidates.len(),
        regions = replication.regions.len(),
        max_parallel = replication.max_parallel,
        "Starting replication"
    );

    let stats: Arc<DashMap<String, RegionStats>> = Arc::new(DashMap::new());
    for region in &replication.regions {
        stats.insert(region.name.clone(), RegionStats::default());
    }

    let uploads: Vec<(RegionTarget, Candidate)> = replication
        .regions
        .iter()
        .flat_map(|region| candidates.iter().map(move |c| (region.clone(), c.clone())))
        .collect();

    stream::iter(uploads)
        .map(|(region, candidate)| {
            let stats = Arc::clone(&stats);
            let cancel = cancel.clone();
            async move {
                let region = &region;
                let candidate = &candidate;
                if cancel.is_cancelled() {
                    warn!(region = %region.name, artifact = %candidate.name, "Skipped: shutdown requested");
                    stats.entry(region.name.clone()).or_default().failed += 1;
                    return;
                }

                let result = tokio::select! {
                    r = upload_and_verify(executor, replication, region, candidate) => r,
                    _ = cancel.cancelled() => {
                        warn!(region = %region.name, artifact = %candidate.name, "Upload cancelled");
                        stats.entry(region.name.clone()).or_default().failed += 1;
                        return;
                    }
                };

                let mut entry = stats.entry(region.name.clone()).or_default();
                match result {
                    Ok(()) => {
                        entry.uploaded += 1;
                        entry.verified += 1;
                        info!(region = %region.name, artifact = %candidate.name, "Replicated and verified");
                    }
                    Err(e) => {
                        entry.failed += 1;
                        warn!(region = %region.name, artifact = %candidate.name, error = %e, "Replication failed");
                    }
                }
            }
        })
        .buffer_unordered(replication.max_parallel.max(1))
        .collect::<Vec<()>>()
        .await;

    if !cancel.is_cancelled() {
        mirror_secondary(executor, config, &candidates).await;
    }

    let per_region: BTreeMap<String, RegionStats> = stats
        .iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect();

    for (region, s) in &per_region {
        info!(
            region = %region,
            uploaded = s.uploaded,
            verified = s.verified,
            failed = s.failed,
            "Region replication summary"
        );
    }

    Ok(ReplicationSummary {
        artifacts: candidates.len(),
        per_region,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, size: u64, sha: &str) -> Candidate {
        Candidate {
            path: PathBuf::from(format!("/b/{name}")),
            name: name.to_string(),
            size_bytes: size,
            sha256: sha.to_string(),
        }
    }

    #[test]
    fn test_s3_key_prefix_handling() {
        let mut region = RegionTarget {
            name: "eu-west-1".into(),
            bucket: "backups-eu".into(),
            prefix: String::new(),
        };
        assert_eq!(s3_key(&region, "db_x.dump.gz"), "db_x.dump.gz");

        region.prefix = "webapp/".into();
        assert_eq!(s3_key(&region, "db_x.dump.gz"), "webapp/db_x.dump.gz");
    }

    #[test]
    fn test_verify_head_accepts_matching_replica() {
        let c = candidate("db_x.dump.gz", 1234, "deadbeef");
        let head = r#"{"ContentLength": 1234, "ETag": "\"whatever-5\"", "Metadata": {"sha256": "deadbeef"}}"#;
        verify_head(head, &c).unwrap();
    }

    #[test]
    fn test_verify_head_rejects_size_mismatch() {
        let c = candidate("db_x.dump.gz", 1234, "deadbeef");
        let head = r#"{"ContentLength": 999, "Metadata": {"sha256": "deadbeef"}}"#;
        assert!(verify_head(head, &c).is_err());
    }

    #[test]
    fn test_verify_head_rejects_checksum_mismatch_even_when_etag_matches() {
        let c = candidate("db_x.dump.gz", 1234, "deadbeef");
        let head = r#"{"ContentLength": 1234, "ETag": "\"deadbeef\"", "Metadata": {"sha256": "cafebabe"}}"#;
        assert!(verify_head(head, &c).is_err());
    }

    #[test]
    fn test_verify_head_rejects_missing_metadata() {
        let c = candidate("db_x.dump.gz", 1234, "deadbeef");
        let head = r#"{"ContentLength": 1234}"#;
        assert!(verify_head(head, &c).is_err());
    }

    #[tokio::test]
    async fn test_discover_honors_window() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("db_20250807T020000.dump.gz"), b"x").unwrap();
        std::fs::write(dir.path().join("manifest_20250807T020000.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let mut config = Config::default();
        config.general.backup_dir = dir.path().to_path_buf();

        let found = discover(&config).unwrap();
        assert_eq!(found.len(), 2);

        config.replication.window_hours = 0;
        let found = discover(&config).unwrap();
        assert!(found.len() <= 2);
    }

    #[tokio::test]
    async fn test_dry_run_replication_counts_uploads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("db_20250807T020000.dump.gz"), b"dump").unwrap();

        let mut config = Config::default();
        config.general.backup_dir = dir.path().to_path_buf();
        config.replication.regions = vec![
            RegionTarget {
                name: "eu-west-1".into(),
                bucket: "backups-eu".into(),
                prefix: String::new(),
            },
            RegionTarget {
                name: "us-east-1".into(),
                bucket: "backups-us".into(),
                prefix: String::new(),
            },
        ];

        let executor = Executor::new(true);
        let summary = run(&config, &executor, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.artifacts, 1);
        assert_eq!(summary.per_region.len(), 2);
        assert_eq!(summary.total_failed(), 0);
        for stats in summary.per_region.values() {
            assert_eq!(stats.uploaded, 1);
        }
    }
}
