//! Run a task's argv on the local machine.

use std::future::Future;
use std::process::ExitStatus;

use camino::Utf8Path;
use qlaunch_parsers::{CommandError, describe_status, run_inherited};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Empty argv")]
    EmptyArgv,
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Executes an argv and reports how it exited.
pub trait ExternalProcess {
    /// `env` is added to the inherited environment; `dir` is the working
    /// directory, the current one when None.
    fn run(
        &self,
        argv: &[String],
        env: &[(String, String)],
        dir: Option<&Utf8Path>,
    ) -> impl Future<Output = Result<ExitStatus, ProcessError>> + Send;
}

/// Child process with inherited stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcess;

impl ExternalProcess for LocalProcess {
    async fn run(
        &self,
        argv: &[String],
        env: &[(String, String)],
        dir: Option<&Utf8Path>,
    ) -> Result<ExitStatus, ProcessError> {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyArgv)?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        if let Some(dir) = dir {
            cmd.current_dir(dir.as_std_path());
        }

        let status = run_inherited(&mut cmd, program).await?;
        if status.success() {
            tracing::debug!("{} finished with {}", program, describe_status(&status));
        } else {
            tracing::warn!("{} finished with {}", program, describe_status(&status));
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_exit_status_is_passed_through() {
        let status = LocalProcess
            .run(&argv(&["sh", "-c", "exit 3"]), &[], None)
            .await
            .unwrap();
        assert_eq!(status.code(), Some(3));

        let status = LocalProcess
            .run(&argv(&["sh", "-c", "exit 0"]), &[], None)
            .await
            .unwrap();
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_env_and_dir() {
        let temp = TempDir::new().unwrap();
        let dir = Utf8Path::from_path(temp.path()).unwrap();
        let env = vec![("PBS_ARRAYID".to_string(), "7".to_string())];

        let status = LocalProcess
            .run(
                &argv(&["sh", "-c", "echo \"$PBS_ARRAYID\" > task.txt"]),
                &env,
                Some(dir),
            )
            .await
            .unwrap();
        assert!(status.success());
        assert_eq!(
            std::fs::read_to_string(dir.join("task.txt")).unwrap(),
            "7\n"
        );
    }

    #[tokio::test]
    async fn test_errors() {
        assert!(matches!(
            LocalProcess.run(&[], &[], None).await,
            Err(ProcessError::EmptyArgv)
        ));
        assert!(matches!(
            LocalProcess
                .run(&argv(&["/nonexistent/python"]), &[], None)
                .await,
            Err(ProcessError::Command(CommandError::Execution { .. }))
        ));
    }
}
