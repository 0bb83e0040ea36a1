//! Boundary to external processes.
//!
//! A [`CommandExecutor`] runs one command and reports how it exited. It never
//! retries and never interprets output; that is the job of the layers above.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::Interrupt;

/// Captured text of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, skipping empty streams.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("command exited with status {}", describe_code(.code))]
    Exit {
        code: Option<i32>,
        output: CommandOutput,
    },
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("command cancelled")]
    Cancelled,
}

fn describe_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown (terminated by signal)".to_string(), |c| c.to_string())
}

impl CommandError {
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandError::Exit { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Error text for alerts: the error itself plus the last non-empty line
    /// of stderr, if any.
    pub fn diagnostic(&self) -> String {
        let last_line = self
            .output()
            .and_then(|o| o.stderr.lines().rev().find(|l| !l.trim().is_empty()))
            .map(str::trim);
        match last_line {
            Some(line) => format!("{self}: {line}"),
            None => self.to_string(),
        }
    }
}

impl Interrupt for CommandError {
    fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Cancelled)
    }
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` to completion, or until `cancel` fires.
    async fn run(
        &self,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// `sh -c <command>` or `cmd /C <command>` depending on the platform.
pub fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn run(
        &self,
        command: &str,
        cancel: CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        debug!(cmd = %command, "spawning shell command");

        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(CommandError::Spawn)?;

        // Dropping the wait future drops the child, which kills it.
        tokio::select! {
            res = child.wait_with_output() => {
                let out = res.map_err(CommandError::Spawn)?;
                let output = CommandOutput {
                    stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                };
                let code = out.status.code();
                info!(cmd = %command, exit_code = ?code, success = out.status.success(), "command exited");
                if out.status.success() {
                    Ok(output)
                } else {
                    Err(CommandError::Exit { code, output })
                }
            }
            _ = cancel.cancelled() => {
                info!(cmd = %command, "cancellation requested; killing command");
                Err(CommandError::Cancelled)
            }
        }
    }
}
