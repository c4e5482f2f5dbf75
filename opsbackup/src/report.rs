//! Run reports — one JSON document per top-level operation.
//!
//! Every invocation, successful or not, leaves a report under
//! `<backup_dir>/reports/` recording what was attempted, step by step.

use crate::backup::manifest::ArtifactRecord;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Ok,
    Failed,
    Skipped,
}

/// One step of a run: what ran, how it went, how long it took.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub detail: String,
    pub duration_secs: f64,
}

/// The report document. Schema is versioned; the original scripts each
/// invented their own shape, which made the reports unparseable in bulk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub version: u32,
    pub run_id: String,
    pub operation: String,
    pub instance: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub steps: Vec<StepRecord>,
    pub artifacts: Vec<ArtifactRecord>,
    pub verification_failed: bool,
    pub exit_code: i32,
}

/// Accumulates step records while an operation runs.
pub struct RunReporter {
    run_id: String,
    operation: String,
    instance: String,
    started_at: DateTime<Utc>,
    started: Instant,
    steps: Vec<StepRecord>,
}

impl RunReporter {
    pub fn new(operation: &str, instance: &str) -> Self {
        RunReporter {
            run_id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            instance: instance.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            steps: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&mut self, name: &str, status: StepStatus, detail: impl Into<String>) {
        self.steps.push(StepRecord {
            name: name.to_string(),
            status,
            detail: detail.into(),
            duration_secs: 0.0,
        });
    }

    /// Time a fallible step and record its outcome before propagating it.
    pub async fn step<T, F>(&mut self, name: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let duration = start.elapsed().as_secs_f64();
        match &result {
            Ok(_) => self.steps.push(StepRecord {
                name: name.to_string(),
                status: StepStatus::Ok,
                detail: String::new(),
                duration_secs: duration,
            }),
            Err(e) => self.steps.push(StepRecord {
                name: name.to_string(),
                status: StepStatus::Failed,
                detail: e.to_string(),
                duration_secs: duration,
            }),
        }
        result
    }

    pub fn finish(
        self,
        status: &str,
        artifacts: Vec<ArtifactRecord>,
        verification_failed: bool,
        exit_code: i32,
    ) -> RunReport {
        RunReport {
            version: 1,
            run_id: self.run_id,
            operation: self.operation,
            instance: self.instance,
            status: status.to_string(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_secs: self.started.elapsed().as_secs_f64(),
            steps: self.steps,
            artifacts,
            verification_failed,
            exit_code,
        }
    }
}

/// Write the report to `<reports_dir>/<operation>_<run_id>.json`.
pub fn write_report(reports_dir: &Path, report: &RunReport) -> Result<PathBuf> {
    std::fs::create_dir_all(reports_dir)?;
    let path = reports_dir.join(format!("{}_{}.json", report.operation, report.run_id));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&path, json)?;
    info!(report = %path.display(), status = %report.status, "Run report written");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;

    #[tokio::test]
    async fn test_step_records_failure_and_propagates() {
        let mut reporter = RunReporter::new("backup", "test");

        let ok: Result<u32> = reporter.step("first", async { Ok(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let err: Result<u32> = reporter
            .step("second", async {
                Err(OpsError::Verification("bad artifact".into()))
            })
            .await;
        assert!(err.is_err());

        let report = reporter.finish("failed", vec![], true, 1);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].status, StepStatus::Ok);
        assert_eq!(report.steps[1].status, StepStatus::Failed);
        assert!(report.steps[1].detail.contains("bad artifact"));
    }

    #[test]
    fn test_write_report_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = RunReporter::new("cleanup", "test");
        let report = reporter.finish("success", vec![], false, 0);

        let path = write_report(dir.path(), &report).unwrap();
        let loaded: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.operation, "cleanup");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.exit_code, 0);
    }
}
