//! Action executor — every external tool invocation goes through here.
//!
//! One place owns the rules the original scripts re-implemented per call
//! site: captured stderr on failure, a timeout per step (so a hung
//! `pg_dump` is attributable to its step, not to "the run"), an optional
//! fixed-count retry policy, and dry-run short-circuiting.

use crate::error::{OpsError, Result};
use async_compression::tokio::bufread::GzipEncoder;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::Command;
use tracing::{info, warn};

/// How many trailing stderr characters are carried into errors and logs.
const STDERR_TAIL: usize = 500;

/// Outcome of one external command.
#[derive(Debug, Default)]
pub struct ExecOutput {
    pub stdout: String,
    /// True when dry-run skipped the command entirely
    pub skipped: bool,
}

/// Fixed-count, fixed-delay retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            delay,
        }
    }
}

/// Specification for one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: &str, timeout: Duration) -> Self {
        CommandSpec {
            program: program.to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Runs command specs, honoring dry-run.
#[derive(Debug, Clone, Copy)]
pub struct Executor {
    dry_run: bool,
}

impl Executor {
    pub fn new(dry_run: bool) -> Self {
        Executor { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a command to completion, capturing stdout.
    ///
    /// Non-zero exit and per-step timeout are both typed errors carrying
    /// the program name.
    pub async fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        if self.dry_run {
            info!(command = %spec.display(), "dry-run: skipping command");
            return Ok(ExecOutput {
                stdout: String::new(),
                skipped: true,
            });
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let output = tokio::time::timeout(spec.timeout, child.wait_with_output())
            .await
            .map_err(|_| OpsError::CommandTimeout {
                program: spec.program.clone(),
                seconds: spec.timeout.as_secs(),
            })??;

        if output.status.success() {
            Ok(ExecOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                skipped: false,
            })
        } else {
            Err(OpsError::CommandFailed {
                program: spec.program.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr_tail(&output.stderr),
            })
        }
    }

    /// Run with a fixed retry policy; only the final failure propagates.
    pub async fn run_with_retry(&self, spec: &CommandSpec, policy: RetryPolicy) -> Result<ExecOutput> {
        let mut last_err = None;
        for attempt in 1..=policy.attempts {
            match self.run(spec).await {
                Ok(out) => return Ok(out),
                Err(e) => {
                    if attempt < policy.attempts {
                        warn!(
                            program = %spec.program,
                            attempt,
                            max = policy.attempts,
                            error = %e,
                            "Command failed, retrying"
                        );
                        tokio::time::sleep(policy.delay).await;
                    }
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| OpsError::CommandFailed {
            program: spec.program.clone(),
            code: -1,
            stderr: String::new(),
        }))
    }

    /// Run a command, streaming its stdout through a gzip encoder into
    /// `dest`. Used for `pg_dump` and RDB snapshots so multi-gigabyte
    /// dumps never buffer in memory.
    ///
    /// On failure the partial artifact is removed.
    pub async fn run_to_gzip(&self, spec: &CommandSpec, dest: &Path) -> Result<ExecOutput> {
        if self.dry_run {
            info!(
                command = %spec.display(),
                dest = %dest.display(),
                "dry-run: skipping command"
            );
            return Ok(ExecOutput {
                stdout: String::new(),
                skipped: true,
            });
        }

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let result = tokio::time::timeout(spec.timeout, async {
            let mut child = command.spawn()?;
            let stdout = child.stdout.take().ok_or_else(|| {
                OpsError::Io(std::io::Error::other("child stdout not captured"))
            })?;

            // Drain stderr concurrently so a chatty child can't fill the
            // pipe buffer and stall mid-dump.
            let stderr_task = child.stderr.take().map(|mut stderr| {
                tokio::spawn(async move {
                    use tokio::io::AsyncReadExt;
                    let mut buf = Vec::new();
                    let _ = stderr.read_to_end(&mut buf).await;
                    buf
                })
            });

            let mut encoder = GzipEncoder::new(BufReader::new(stdout));
            let mut file = tokio::fs::File::create(dest).await?;
            tokio::io::copy(&mut encoder, &mut file).await?;
            tokio::io::AsyncWriteExt::flush(&mut file).await?;
            drop(file);

            let stderr_buf = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };

            let status = child.wait().await?;
            if status.success() {
                Ok(ExecOutput::default())
            } else {
                Err(OpsError::CommandFailed {
                    program: spec.program.clone(),
                    code: status.code().unwrap_or(-1),
                    stderr: stderr_tail(&stderr_buf),
                })
            }
        })
        .await
        .unwrap_or(Err(OpsError::CommandTimeout {
            program: spec.program.clone(),
            seconds: spec.timeout.as_secs(),
        }));

        if result.is_err() && dest.exists() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL {
        trimmed.to_string()
    } else {
        let start = trimmed.len() - STDERR_TAIL;
        // Avoid splitting a UTF-8 sequence
        let mut idx = start;
        while !trimmed.is_char_boundary(idx) {
            idx += 1;
        }
        format!("...{}", &trimmed[idx..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(program: &str, args: &[&str]) -> CommandSpec {
        CommandSpec::new(program, Duration::from_secs(5)).args(args.iter().copied())
    }

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let executor = Executor::new(false);
        let out = executor
            .run(&spec("sh", &["-c", "echo orchestrated"]))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "orchestrated");
        assert!(!out.skipped);
    }

    #[tokio::test]
    async fn test_run_nonzero_exit_is_typed() {
        let executor = Executor::new(false);
        let err = executor
            .run(&spec("sh", &["-c", "echo boom >&2; exit 3"]))
            .await
            .unwrap_err();

        match err {
            OpsError::CommandFailed { program, code, stderr } => {
                assert_eq!(program, "sh");
                assert_eq!(code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected CommandFailed, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let executor = Executor::new(false);
        let mut s = spec("sleep", &["5"]);
        s.timeout = Duration::from_millis(100);
        let err = executor.run(&s).await.unwrap_err();
        assert!(matches!(err, OpsError::CommandTimeout { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_skips_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("touched");
        let executor = Executor::new(true);

        let out = executor
            .run(&spec("sh", &["-c", &format!("touch {}", marker.display())]))
            .await
            .unwrap();

        assert!(out.skipped);
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("second-attempt");
        // Fails on first run (marker absent), succeeds on second.
        let script = format!(
            "if [ -e {m} ]; then exit 0; else touch {m}; exit 1; fi",
            m = marker.display()
        );

        let executor = Executor::new(false);
        executor
            .run_with_retry(
                &spec("sh", &["-c", &script]),
                RetryPolicy::fixed(3, Duration::from_millis(10)),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_to_gzip_writes_artifact_and_cleans_up_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok_path = dir.path().join("out.gz");
        let executor = Executor::new(false);

        executor
            .run_to_gzip(&spec("sh", &["-c", "echo payload"]), &ok_path)
            .await
            .unwrap();
        assert!(ok_path.exists());
        assert!(ok_path.metadata().unwrap().len() > 0);

        let bad_path = dir.path().join("bad.gz");
        let err = executor
            .run_to_gzip(&spec("sh", &["-c", "echo partial; exit 1"]), &bad_path)
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::CommandFailed { .. }));
        assert!(!bad_path.exists());
    }
}
