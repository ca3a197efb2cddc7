//! External command execution.
//!
//! The cloud adapters drive the `aws` CLI through the [`CommandRunner`] trait
//! so they can be exercised against canned output in tests.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into a [`CommandError::Failed`], returning stdout otherwise.
    pub fn into_stdout(self, program: &str, action: &str) -> Result<String, CommandError> {
        if self.success() {
            return Ok(self.stdout);
        }

        Err(CommandError::Failed {
            program: program.to_string(),
            action: action.to_string(),
            status: self
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stderr: self.stderr.trim().to_string(),
        })
    }
}

/// Errors from running external commands.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} {action} exited with status {status}: {stderr}")]
    Failed {
        program: String,
        action: String,
        status: String,
        stderr: String,
    },

    #[error("unexpected output from {program} {action}: {message}")]
    Output {
        program: String,
        action: String,
        message: String,
    },
}

impl CommandError {
    /// Returns true if the command failed and its stderr mentions `code`.
    ///
    /// Both CLIs print the service error code in stderr, e.g.
    /// `(InvalidInstanceID.NotFound)` or `Error from server (NotFound)`.
    pub fn mentions(&self, code: &str) -> bool {
        match self {
            CommandError::Failed { stderr, .. } => stderr.contains(code),
            _ => false,
        }
    }
}

/// Runs an external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Upper bound on a single invocation; the child is killed past it.
    timeout: Duration,
}

impl ProcessRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, CommandError> {
        debug!(program, args = ?args, "Running command");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|source| CommandError::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(CommandError::Spawn {
                    program: program.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("timed out after {:?}", self.timeout),
                    ),
                })
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_stdout_success() {
        let out = CommandOutput::ok("{}").into_stdout("aws", "sqs receive-message");
        assert_eq!(out.unwrap(), "{}");
    }

    #[test]
    fn test_into_stdout_failure_keeps_stderr() {
        let err = CommandOutput::failed(254, "An error occurred (InvalidInstanceID.NotFound)\n")
            .into_stdout("aws", "ec2 describe-instances")
            .unwrap_err();

        assert!(err.mentions("InvalidInstanceID.NotFound"));
        assert!(!err.mentions("Throttling"));
        assert_eq!(
            err.to_string(),
            "aws ec2 describe-instances exited with status 254: An error occurred (InvalidInstanceID.NotFound)"
        );
    }

    #[tokio::test]
    async fn test_process_runner_missing_program() {
        let runner = ProcessRunner::new(Duration::from_secs(5));
        let result = runner
            .run("drainhook-definitely-not-a-binary", &[])
            .await;
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }
}
