//! Command execution utilities for scheduler calls.

use std::process::ExitStatus;

use thiserror::Error;
use tokio::process::Command;

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to execute {command}: {error}")]
    Execution { command: String, error: String },
    #[error("Command {command} failed ({status}): {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Execute a command and return stdout as a string.
///
/// This is a convenience wrapper that handles common error cases
/// and UTF-8 conversion for scheduler command output.
pub async fn run_command(cmd: &mut Command, name: &str) -> Result<String, CommandError> {
    tracing::debug!("Running {}: {:?}", name, cmd.as_std());
    let output = cmd.output().await.map_err(|e| CommandError::Execution {
        command: name.to_string(),
        error: e.to_string(),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CommandError::Failed {
            command: name.to_string(),
            status: describe_status(&output.status),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Execute a command with inherited stdio and return its exit status.
///
/// A non-zero exit is not an error here: the status belongs to the caller.
pub async fn run_inherited(cmd: &mut Command, name: &str) -> Result<ExitStatus, CommandError> {
    tracing::debug!("Running {}: {:?}", name, cmd.as_std());
    cmd.status().await.map_err(|e| CommandError::Execution {
        command: name.to_string(),
        error: e.to_string(),
    })
}

/// Render an exit status as "exit code N" or "signal N".
pub fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {}", signal);
        }
    }
    "unknown status".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_success() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let result = run_command(&mut cmd, "echo").await.unwrap();
        assert_eq!(result.trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_command_not_found() {
        let mut cmd = Command::new("nonexistent_command_12345");
        let result = run_command(&mut cmd, "nonexistent").await;
        assert!(matches!(result, Err(CommandError::Execution { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_failure_keeps_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo nope >&2; exit 3"]);
        let err = run_command(&mut cmd, "sh").await.unwrap_err();
        match err {
            CommandError::Failed { status, stderr, .. } => {
                assert_eq!(status, "exit code 3");
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_inherited_returns_status() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 7"]);
        let status = run_inherited(&mut cmd, "sh").await.unwrap();
        assert_eq!(status.code(), Some(7));
    }
}
