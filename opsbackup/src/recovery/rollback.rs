//! Rollback points — pre-restore snapshots of the current state.
//!
//! Taken best-effort before a destructive restore. If the snapshot
//! failed and a later step forces a rollback, the run is unrecoverable
//! and must be reported as FAILED rather than ROLLED_BACK.

use crate::backup::{database, files};
use crate::config::Config;
use crate::error::Result;
use crate::exec::Executor;
use crate::recovery::Scenario;
use std::path::PathBuf;
use tracing::{info, warn};

/// What was captured before the restore started.
#[derive(Debug, Default)]
pub struct RollbackPoint {
    pub database_dump: Option<PathBuf>,
    pub files_archive: Option<PathBuf>,
}

impl RollbackPoint {
    /// Whether this point can actually revert the given scenario.
    pub fn covers(&self, scenario: Scenario) -> bool {
        match scenario {
            Scenario::Database => self.database_dump.is_some(),
            Scenario::Files => self.files_archive.is_some(),
            Scenario::Full => self.database_dump.is_some() && self.files_archive.is_some(),
        }
    }

    /// Remove the snapshot files.
    pub fn remove(&self) {
        for path in [&self.database_dump, &self.files_archive].into_iter().flatten() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove rollback point");
            }
        }
    }
}

/// Snapshot current state into the rollback directory. Each component is
/// best-effort: a failure is logged and leaves that side of the point
/// empty.
pub async fn snapshot(
    executor: &Executor,
    config: &Config,
    scenario: Scenario,
    token: &str,
) -> Result<RollbackPoint> {
    let dir = config.rollback_dir();
    std::fs::create_dir_all(&dir)?;

    let mut point = RollbackPoint::default();

    if matches!(scenario, Scenario::Database | Scenario::Full) {
        match database::dump(executor, &config.database, &dir, token).await {
            Ok(path) => point.database_dump = path,
            Err(e) => warn!(error = %e, "Rollback snapshot of database failed"),
        }
    }

    if matches!(scenario, Scenario::Files | Scenario::Full) {
        match files::archive(executor, &config.files, &dir, token).await {
            Ok(path) => point.files_archive = path,
            Err(e) => warn!(error = %e, "Rollback snapshot of files failed"),
        }
    }

    if point.database_dump.is_some() || point.files_archive.is_some() {
        info!(
            database = point.database_dump.is_some(),
            files = point.files_archive.is_some(),
            "Rollback point captured"
        );
    }
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_matches_scenario() {
        let none = RollbackPoint::default();
        assert!(!none.covers(Scenario::Database));
        assert!(!none.covers(Scenario::Full));

        let db_only = RollbackPoint {
            database_dump: Some(PathBuf::from("/r/db_x.dump.gz")),
            files_archive: None,
        };
        assert!(db_only.covers(Scenario::Database));
        assert!(!db_only.covers(Scenario::Files));
        assert!(!db_only.covers(Scenario::Full));
    }
}
