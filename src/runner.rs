//! Running shell commands and capturing what they print.
//!
//! The lifecycle controller only ever sees [`CommandRunner`], so tests can
//! substitute a scripted runner and production uses [`ShellRunner`].

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};

/// Captured result of one command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code: Some(exit_code),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs a full shell command line and waits for it to exit, giving up
    /// with [`Error::CommandTimedOut`] once `limit` has passed.
    async fn run(&self, command: &str, limit: Option<Duration>) -> Result<CommandOutput>;
}

const SHELL: &str = "/bin/sh";

/// Runs commands through `/bin/sh -c`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, limit: Option<Duration>) -> Result<CommandOutput> {
        debug!(command = %command, ?limit, "Running shell command");

        let child = Command::new(SHELL)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match limit {
            Some(limit) => timeout(limit, child)
                .await
                .map_err(|_| Error::CommandTimedOut {
                    command: command.to_string(),
                    timeout: limit,
                })??,
            None => child.await?,
        };

        if !output.stderr.is_empty() {
            debug!(
                command = %command,
                stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
                "Command wrote to stderr"
            );
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
