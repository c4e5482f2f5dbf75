//! Manifest types for backup runs.
//!
//! A manifest records every artifact a run produced with its size and
//! SHA-256, plus which components were included. Artifacts from one run
//! are not point-in-time consistent with each other — the database dump
//! and the Redis snapshot are taken sequentially.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which backup component produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Database,
    Redis,
    Files,
}

impl ArtifactKind {
    /// File-name prefix for this component's artifacts.
    pub fn prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Database => "db",
            ArtifactKind::Redis => "redis",
            ArtifactKind::Files => "files",
        }
    }

    /// Whether `file_name` looks like an artifact of this kind,
    /// encrypted or not.
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&format!("{}_", self.prefix()))
            && (file_name.ends_with(".gz") || file_name.ends_with(".gz.enc"))
    }

    pub fn all() -> [ArtifactKind; 3] {
        [ArtifactKind::Database, ArtifactKind::Redis, ArtifactKind::Files]
    }
}

/// An artifact on disk, as tracked during a run.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    pub sha256: String,
    pub encrypted: bool,
}

impl Artifact {
    pub fn record(&self) -> ArtifactRecord {
        ArtifactRecord {
            name: self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            kind: self.kind,
            size_bytes: self.size_bytes,
            sha256: self.sha256.clone(),
            encrypted: self.encrypted,
        }
    }
}

/// Serialized form of an artifact inside manifests and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    pub sha256: String,
    pub encrypted: bool,
}

/// Component flags for one run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ComponentFlags {
    pub database: bool,
    pub redis: bool,
    pub files: bool,
}

impl ComponentFlags {
    pub fn full() -> Self {
        ComponentFlags {
            database: true,
            redis: true,
            files: true,
        }
    }

    pub fn only(kind: ArtifactKind) -> Self {
        let mut flags = ComponentFlags::default();
        match kind {
            ArtifactKind::Database => flags.database = true,
            ArtifactKind::Redis => flags.redis = true,
            ArtifactKind::Files => flags.files = true,
        }
        flags
    }
}

/// Backup manifest — written once per run, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub run_id: String,
    pub instance: String,
    pub created_at: DateTime<Utc>,
    pub components: ComponentFlags,
    pub artifacts: Vec<ArtifactRecord>,
    pub total_bytes: u64,
}

impl Manifest {
    pub fn new(
        run_id: &str,
        instance: &str,
        components: ComponentFlags,
        artifacts: &[Artifact],
    ) -> Self {
        Manifest {
            version: 1,
            run_id: run_id.to_string(),
            instance: instance.to_string(),
            created_at: Utc::now(),
            components,
            artifacts: artifacts.iter().map(Artifact::record).collect(),
            total_bytes: artifacts.iter().map(|a| a.size_bytes).sum(),
        }
    }

    /// Write to `<dir>/manifest_<token>.json`.
    pub fn write(&self, dir: &Path, token: &str) -> Result<PathBuf> {
        let path = dir.join(format!("manifest_{token}.json"));
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_artifact_names() {
        let db = ArtifactKind::Database;
        assert!(db.matches("db_20250807T020000.dump.gz"));
        assert!(db.matches("db_20250807T020000.dump.gz.enc"));
        assert!(!db.matches("redis_20250807T020000.rdb.gz"));
        assert!(!db.matches("db_20250807T020000.dump"));
        assert!(!db.matches("manifest_20250807T020000.json"));
    }

    #[test]
    fn test_manifest_write_read() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = Artifact {
            path: dir.path().join("db_20250807T020000.dump.gz"),
            kind: ArtifactKind::Database,
            size_bytes: 1234,
            sha256: "ab".repeat(32),
            encrypted: false,
        };

        let manifest = Manifest::new("run-1", "test", ComponentFlags::only(ArtifactKind::Database), &[artifact]);
        let path = manifest.write(dir.path(), "20250807T020000").unwrap();

        let loaded = Manifest::read(&path).unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.artifacts.len(), 1);
        assert_eq!(loaded.artifacts[0].name, "db_20250807T020000.dump.gz");
        assert_eq!(loaded.total_bytes, 1234);
        assert!(loaded.components.database);
        assert!(!loaded.components.redis);
    }
}
