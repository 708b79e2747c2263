//! External command execution.
//!
//! Every git invocation goes through [`CommandRunner::run`]. A non-zero exit
//! code is not an error at this layer: callers decide what git's exit status
//! means for them. Only a launch failure or a timeout is reported as
//! [`CommandError`]. There are no retries here.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Default program driven by [`ProcessRunner`].
pub const GIT_PROGRAM: &str = "git";

/// Captured outcome of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, or `-1` when the process was terminated by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Convert a non-zero exit into [`crate::Error::NonZeroExit`].
    pub fn check(self, command: &str) -> crate::Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(crate::Error::NonZeroExit {
                command: command.to_string(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Failures of the runner itself, as opposed to failures reported by git.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` timed out after {}s", .timeout.as_secs_f32())]
    TimedOut { command: String, timeout: Duration },
}

/// Executes external commands on behalf of the reconciler and controller.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the program with `args` inside `cwd`, killing it after `timeout`.
    async fn run(
        &self,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError>;
}

/// Build an owned argument list from string-like pieces.
pub fn args<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Render a command line for logs and error messages.
pub fn describe(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Runs a real program (git by default) through `tokio::process`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn git() -> Self {
        Self::new(GIT_PROGRAM)
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::git()
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        args: &[String],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let command = describe(&self.program, args);
        let start = Instant::now();

        // kill_on_drop: dropping the wait future on timeout kills the child.
        let child = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::LaunchFailed {
                program: self.program.clone(),
                source,
            })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = CommandResult {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                };
                debug!(
                    command = %command,
                    cwd = %cwd.display(),
                    exit_code = result.exit_code,
                    elapsed_ms = start.elapsed().as_millis(),
                    "command finished"
                );
                Ok(result)
            }
            Ok(Err(source)) => Err(CommandError::LaunchFailed {
                program: self.program.clone(),
                source,
            }),
            Err(_) => {
                warn!(command = %command, cwd = %cwd.display(), ?timeout, "command timed out, killed");
                Err(CommandError::TimedOut { command, timeout })
            }
        }
    }
}
