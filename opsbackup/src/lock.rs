//! Single-run lock.
//!
//! A PID file created with `O_CREAT|O_EXCL`, so acquisition is atomic —
//! two cron invocations racing for it cannot both win. A lock whose PID
//! no longer exists is stale and gets reclaimed.

use crate::error::{OpsError, Result};
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Held for the duration of an operation; the file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock, reclaiming it if the holding process is gone.
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match Self::try_create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Self::holder_alive(path) {
                    let holder = std::fs::read_to_string(path).unwrap_or_default();
                    Err(OpsError::Lock(format!(
                        "{} held by pid {}",
                        path.display(),
                        holder.trim()
                    )))
                } else {
                    warn!(lock = %path.display(), "Reclaiming stale lock");
                    std::fs::remove_file(path)?;
                    Self::try_create(path).map_err(OpsError::Io)
                }
            }
            Err(e) => Err(OpsError::Io(e)),
        }
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        write!(file, "{}", std::process::id())?;
        info!(lock = %path.display(), pid = std::process::id(), "Lock acquired");
        Ok(RunLock {
            path: path.to_path_buf(),
        })
    }

    /// Does the process named in the lock file still exist?
    fn holder_alive(path: &Path) -> bool {
        let Ok(content) = std::fs::read_to_string(path) else {
            return false;
        };
        let Ok(pid) = content.trim().parse::<i32>() else {
            // Unparseable lock content: assume alive rather than stomp it
            return true;
        };
        kill(Pid::from_raw(pid), None).is_ok()
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to remove lock file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opsbackup.lock");

        {
            let _lock = RunLock::acquire(&path).unwrap();
            assert!(path.exists());
            // Second acquisition while held fails — our own PID is alive
            let err = RunLock::acquire(&path).unwrap_err();
            assert!(matches!(err, OpsError::Lock(_)));
        }

        // Released on drop
        assert!(!path.exists());
        let _lock = RunLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opsbackup.lock");
        // A PID that cannot exist (beyond pid_max on any stock kernel)
        std::fs::write(&path, "999999999").unwrap();

        let lock = RunLock::acquire(&path).unwrap();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_unparseable_lock_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("opsbackup.lock");
        std::fs::write(&path, "not-a-pid").unwrap();

        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, OpsError::Lock(_)));
        assert!(path.exists());
    }
}
