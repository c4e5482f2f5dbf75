//! Prerequisite validation run before any operation touches data.
//!
//! Resolves every required external tool on PATH, makes sure the backup
//! directory exists, and checks free space. All missing tools are collected
//! and reported in one error instead of failing on the first.

use crate::error::{OpsError, Result};
use nix::sys::statvfs::statvfs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Resolve a program name against PATH, honoring the executable bit.
pub fn which(program: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Free bytes available to unprivileged users on the filesystem holding `path`.
pub fn free_space(path: &Path) -> Result<u64> {
    let stat = statvfs(path)
        .map_err(|e| OpsError::Preflight(format!("statvfs({}) failed: {e}", path.display())))?;
    Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

/// Validate tools, backup directory and free space for one operation.
///
/// The backup directory is created if missing. Fails with every missing
/// tool named at once.
pub fn check(required_tools: &[&str], backup_dir: &Path, min_free_bytes: u64) -> Result<()> {
    let missing: Vec<&str> = required_tools
        .iter()
        .copied()
        .filter(|tool| which(tool).is_none())
        .collect();

    if !missing.is_empty() {
        return Err(OpsError::Preflight(format!(
            "required tools not found on PATH: {}",
            missing.join(", ")
        )));
    }

    if !backup_dir.exists() {
        info!(dir = %backup_dir.display(), "Creating backup directory");
        std::fs::create_dir_all(backup_dir)?;
    }

    let free = free_space(backup_dir)?;
    if free < min_free_bytes {
        return Err(OpsError::Preflight(format!(
            "insufficient free space in {}: {} bytes available, {} required",
            backup_dir.display(),
            free,
            min_free_bytes
        )));
    }

    debug!(
        tools = required_tools.len(),
        free_bytes = free,
        "Preflight checks passed"
    );
    Ok(())
}
