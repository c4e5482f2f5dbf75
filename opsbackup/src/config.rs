//! Configuration for the orchestrator.
//!
//! Loads a TOML file when `--config` is given, otherwise starts from
//! defaults; either way the operational knobs can be overridden through
//! environment variables (`BACKUP_DIR`, `DB_NAME`, `DRY_RUN`, ...), which
//! keeps the tool drivable from cron entries and CI the same way the
//! original shell scripts were.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub files: FilesConfig,
    pub services: ServicesConfig,
    pub encryption: EncryptionConfig,
    pub recovery: RecoveryConfig,
    pub replication: ReplicationConfig,
    pub notify: NotifyConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Instance name carried into manifests, reports and notifications
    pub instance: String,

    /// Directory all artifacts, reports and locks live under
    pub backup_dir: PathBuf,

    /// Artifacts older than this many days are removed by `cleanup`
    pub retention_days: i64,

    /// Minimum free space required in the backup directory
    pub min_free_bytes: u64,

    /// Log and skip every external command instead of running it
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub name: String,

    /// Per-step timeout for dump/restore commands
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,

    /// Where the Redis server writes its RDB snapshot
    pub rdb_path: PathBuf,

    /// How long to wait for BGSAVE to complete
    pub bgsave_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Root the archived paths are relative to
    pub root: PathBuf,

    /// Application directories included in the files component
    pub paths: Vec<PathBuf>,

    /// Paths that must exist for post-restore validation to pass
    pub critical_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// systemd units stopped before a restore and started after
    pub units: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub enabled: bool,

    /// Key file handed to `openssl enc -pass file:...`
    pub key_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Which artifact to restore: `latest` or a name/timestamp token
    pub recovery_point: String,

    /// Scratch database used by the restorability probe
    pub scratch_db: String,

    /// Run the decrypt-and-restore probe during `verify`
    pub probe_restore: bool,

    /// Sample query that must succeed during post-restore validation
    pub sample_query: String,

    /// Recovery Time Objective; a slower recovery is flagged in the log
    pub rto_minutes: i64,

    /// Recovery Point Objective; restoring from an older backup than
    /// this is flagged as exceeding the acceptable data-loss window
    pub rpo_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// S3 region targets, tried for every recent artifact
    pub regions: Vec<RegionTarget>,

    /// Optional `az storage blob upload` mirror (container name)
    pub azure_container: Option<String>,

    /// Optional `gsutil cp` mirror (bucket URL, e.g. gs://backups-dr)
    pub gcs_bucket: Option<String>,

    /// Only artifacts modified within this window are replicated
    pub window_hours: i64,

    /// Maximum concurrent uploads across all regions
    pub max_parallel: usize,

    /// Per-upload timeout
    pub upload_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionTarget {
    /// Region label used in logs and stats (e.g. `eu-west-1`)
    pub name: String,

    /// Destination bucket
    pub bucket: String,

    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifyConfig {
    pub slack_webhook_url: Option<String>,
    pub discord_webhook_url: Option<String>,
    pub pagerduty_routing_key: Option<String>,
    pub pushgateway_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            instance: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "webapp".to_string()),
            backup_dir: PathBuf::from("/var/backups/webapp"),
            retention_days: 30,
            min_free_bytes: 1024 * 1024 * 1024, // 1 GiB
            dry_run: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            name: "webapp".to_string(),
            timeout_secs: 3600,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            host: "localhost".to_string(),
            port: 6379,
            rdb_path: PathBuf::from("/var/lib/redis/dump.rdb"),
            bgsave_timeout_secs: 300,
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        FilesConfig {
            root: PathBuf::from("/var/www/webapp"),
            paths: vec![PathBuf::from("uploads"), PathBuf::from("config")],
            critical_paths: vec![PathBuf::from("uploads")],
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        ServicesConfig {
            units: vec!["webapp".to_string()],
        }
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            enabled: false,
            key_file: PathBuf::from("/etc/opsbackup/backup.key"),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig {
            recovery_point: "latest".to_string(),
            scratch_db: "opsbackup_verify".to_string(),
            probe_restore: false,
            sample_query: "SELECT 1".to_string(),
            rto_minutes: 60,
            rpo_hours: 24,
        }
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            regions: Vec::new(),
            azure_container: None,
            gcs_bucket: None,
            window_hours: 24,
            max_parallel: 4,
            upload_timeout_secs: 1800,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment-variable overrides on top of whatever was loaded.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = std::env::var_os("BACKUP_DIR") {
            self.general.backup_dir = PathBuf::from(dir);
        }
        if let Ok(v) = std::env::var("RETENTION_DAYS") {
            if let Ok(days) = v.parse() {
                self.general.retention_days = days;
            }
        }
        if let Ok(v) = std::env::var("DRY_RUN") {
            self.general.dry_run = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("DB_HOST") {
            self.database.host = v;
        }
        if let Ok(v) = std::env::var("DB_PORT") {
            if let Ok(port) = v.parse() {
                self.database.port = port;
            }
        }
        if let Ok(v) = std::env::var("DB_USER") {
            self.database.user = v;
        }
        if let Ok(v) = std::env::var("DB_NAME") {
            self.database.name = v;
        }
        if let Ok(v) = std::env::var("REDIS_HOST") {
            self.redis.host = v;
        }
        if let Ok(v) = std::env::var("REDIS_PORT") {
            if let Ok(port) = v.parse() {
                self.redis.port = port;
            }
        }
        if let Ok(v) = std::env::var("RECOVERY_POINT") {
            self.recovery.recovery_point = v;
        }
        if let Ok(v) = std::env::var("ENCRYPTION_KEY_FILE") {
            self.encryption.enabled = true;
            self.encryption.key_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SLACK_WEBHOOK_URL") {
            self.notify.slack_webhook_url = Some(v);
        }
        if let Ok(v) = std::env::var("DISCORD_WEBHOOK_URL") {
            self.notify.discord_webhook_url = Some(v);
        }
        if let Ok(v) = std::env::var("PAGERDUTY_ROUTING_KEY") {
            self.notify.pagerduty_routing_key = Some(v);
        }
        if let Ok(v) = std::env::var("PUSHGATEWAY_URL") {
            self.notify.pushgateway_url = Some(v);
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            self.log.level = v;
        }
    }

    /// Directory run reports are written to
    pub fn reports_dir(&self) -> PathBuf {
        self.general.backup_dir.join("reports")
    }

    /// Directory transient rollback points live in
    pub fn rollback_dir(&self) -> PathBuf {
        self.general.backup_dir.join("rollback")
    }

    /// Path of the PID lock file guarding overlapping runs
    pub fn lock_path(&self) -> PathBuf {
        self.general.backup_dir.join("opsbackup.lock")
    }
}
