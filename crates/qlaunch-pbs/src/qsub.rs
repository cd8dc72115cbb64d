//! Submit job scripts with qsub.

use std::future::Future;

use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use qlaunch_parsers::{CommandError, run_command};
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;

use crate::types::JobHandle;

#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("Failed to execute {program}: {error}")]
    Execution { program: String, error: String },
    #[error("Submission rejected by the scheduler ({status}): {stderr}")]
    Rejected { status: String, stderr: String },
    #[error("No job id in qsub output: {stdout:?}")]
    NoJobId { stdout: String },
}

/// Something that accepts a job script and returns a handle to the queued job.
pub trait JobScheduler {
    fn submit(
        &self,
        script: &Utf8Path,
    ) -> impl Future<Output = Result<JobHandle, SubmitError>> + Send;
}

// 12345.server, 12345[].server, 12345
static JOB_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<seq>\d+)(?P<array>\[\d*\])?(?:\.(?P<server>\S+))?$").expect("valid regex")
});

/// Parse the job id from qsub's stdout (first non-empty line).
pub fn parse_job_id(stdout: &str) -> Option<JobHandle> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty())?;
    let caps = JOB_ID_RE.captures(line)?;
    Some(JobHandle {
        id: line.to_string(),
        sequence: caps["seq"].parse().ok()?,
        server: caps.name("server").map(|m| m.as_str().to_string()),
        is_array: caps.name("array").is_some(),
    })
}

/// `qsub <script>`.
#[derive(Debug, Clone)]
pub struct Qsub {
    program: Utf8PathBuf,
}

impl Default for Qsub {
    fn default() -> Self {
        Self::new("qsub")
    }
}

impl Qsub {
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl JobScheduler for Qsub {
    async fn submit(&self, script: &Utf8Path) -> Result<JobHandle, SubmitError> {
        let mut cmd = Command::new(self.program.as_std_path());
        cmd.arg(script.as_std_path());

        let stdout = run_command(&mut cmd, self.program.as_str())
            .await
            .map_err(|e| match e {
                CommandError::Execution { command, error } => SubmitError::Execution {
                    program: command,
                    error,
                },
                CommandError::Failed { status, stderr, .. } => {
                    SubmitError::Rejected { status, stderr }
                }
            })?;

        let handle = parse_job_id(&stdout).ok_or_else(|| SubmitError::NoJobId {
            stdout: stdout.trim().to_string(),
        })?;
        tracing::info!("Submitted {} as job {}", script, handle);
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_id() {
        let handle = parse_job_id("12345.yeti-svc\n").unwrap();
        assert_eq!(handle.id, "12345.yeti-svc");
        assert_eq!(handle.sequence, 12345);
        assert_eq!(handle.server.as_deref(), Some("yeti-svc"));
        assert!(!handle.is_array);

        let array = parse_job_id("\n  987[].pbs01.cluster.edu  \n").unwrap();
        assert_eq!(array.id, "987[].pbs01.cluster.edu");
        assert!(array.is_array);

        let bare = parse_job_id("42").unwrap();
        assert_eq!(bare.server, None);
        assert_eq!(bare.task_id(1), None);

        assert_eq!(array.task_id(3).as_deref(), Some("987[3].pbs01.cluster.edu"));
        let unnamed = parse_job_id("987[]").unwrap();
        assert_eq!(unnamed.task_id(14).as_deref(), Some("987[14]"));

        assert!(parse_job_id("").is_none());
        assert!(parse_job_id("qsub: submit error").is_none());
    }

    #[cfg(unix)]
    mod fake {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        fn fake_qsub(dir: &Utf8Path, body: &str) -> Utf8PathBuf {
            let path = dir.join("qsub");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_submit_returns_handle() {
            let temp = TempDir::new().unwrap();
            let dir = Utf8Path::from_path(temp.path()).unwrap();
            let qsub = Qsub::new(fake_qsub(dir, "echo \"4242[].server\""));

            let handle = qsub.submit(&dir.join("k2sc.pbs")).await.unwrap();
            assert_eq!(handle.id, "4242[].server");
            assert!(handle.is_array);
        }

        #[tokio::test]
        async fn test_submit_rejected() {
            let temp = TempDir::new().unwrap();
            let dir = Utf8Path::from_path(temp.path()).unwrap();
            let qsub = Qsub::new(fake_qsub(
                dir,
                "echo 'qsub: Unknown queue MSG=cannot locate queue' >&2\nexit 170",
            ));

            match qsub.submit(&dir.join("k2sc.pbs")).await {
                Err(SubmitError::Rejected { status, stderr }) => {
                    assert_eq!(status, "exit code 170");
                    assert!(stderr.contains("Unknown queue"));
                }
                other => panic!("expected rejection, got {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_submit_without_id() {
            let temp = TempDir::new().unwrap();
            let dir = Utf8Path::from_path(temp.path()).unwrap();
            let qsub = Qsub::new(fake_qsub(dir, "echo 'job queued'"));
            assert!(matches!(
                qsub.submit(&dir.join("k2sc.pbs")).await,
                Err(SubmitError::NoJobId { .. })
            ));
        }

        #[tokio::test]
        async fn test_missing_binary() {
            let temp = TempDir::new().unwrap();
            let dir = Utf8Path::from_path(temp.path()).unwrap();
            let qsub = Qsub::new(dir.join("no-such-qsub"));
            assert!(matches!(
                qsub.submit(&dir.join("k2sc.pbs")).await,
                Err(SubmitError::Execution { .. })
            ));
        }
    }
}
