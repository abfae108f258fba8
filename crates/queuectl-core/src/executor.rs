//! Command execution.
//!
//! The engine only sees [`CommandExecutor`]; whatever goes wrong inside an
//! executor (launch failure, non-zero exit, timeout) comes back as a failed
//! [`ExecOutcome`], never as an error.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Result of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub success: bool,
    pub detail: String,
}

impl ExecOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: detail.into(),
        }
    }
}

/// Why an attempt failed.
#[derive(Debug, Error)]
pub enum ExecutionFault {
    #[error("failed to launch: {0}")]
    Launch(#[source] std::io::Error),

    #[error("failed while waiting for the process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("exited with code {0}")]
    ExitCode(i32),

    #[error("terminated by signal")]
    Signal,

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl From<ExecutionFault> for ExecOutcome {
    fn from(fault: ExecutionFault) -> Self {
        ExecOutcome::failure(fault.to_string())
    }
}

/// Runs a job's command.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// May block for as long as the command runs.
    async fn execute(&self, command: &str) -> ExecOutcome;
}

/// Runs commands through the platform shell, so pipes, `&&` and builtins
/// such as `exit 1` work as typed.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor {
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the child and count the attempt as failed after `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn shell(command: &str) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        };
        #[cfg(not(windows))]
        let mut cmd = {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            c
        };
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn run(&self, command: &str) -> Result<(), ExecutionFault> {
        let mut child = Self::shell(command)
            .spawn()
            .map_err(ExecutionFault::Launch)?;

        let status = match self.timeout {
            None => child.wait().await.map_err(ExecutionFault::Wait)?,
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status.map_err(ExecutionFault::Wait)?,
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill timed-out command");
                    }
                    return Err(ExecutionFault::TimedOut(limit));
                }
            },
        };
        check_status(status)
    }
}

fn check_status(status: ExitStatus) -> Result<(), ExecutionFault> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(ExecutionFault::ExitCode(code)),
        None => Err(ExecutionFault::Signal),
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, command: &str) -> ExecOutcome {
        match self.run(command).await {
            Ok(()) => ExecOutcome::success("exited with code 0"),
            Err(fault) => fault.into(),
        }
    }
}
