//! Custom error types for the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Preflight check failed: {0}")]
    Preflight(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{program} exited with {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {seconds}s")]
    CommandTimeout { program: String, seconds: u64 },

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("No backup found matching {0}")]
    NoBackupFound(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(PathBuf),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OpsError>;
