//! Subprocess execution of the management tool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Captured result of one tool run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            // killed by a signal
            code: output.status.code().unwrap_or(-1),
        }
    }
}

/// Runs the management tool with a given argument vector
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        args: &[String],
        stdin: Option<&str>,
        env: &[(String, String)],
    ) -> Result<CommandOutput>;
}

/// Spawns the real tool binary
pub struct ProcessRunner {
    tool_path: String,
}

impl ProcessRunner {
    pub fn new(tool_path: impl Into<String>) -> Self {
        Self {
            tool_path: tool_path.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        args: &[String],
        stdin: Option<&str>,
        env: &[(String, String)],
    ) -> Result<CommandOutput> {
        let mut command = Command::new(&self.tool_path);
        command
            .args(args)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", self.tool_path))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes())
                    .await
                    .context("Failed to write command stdin")?;
                // closing the pipe signals EOF
                drop(pipe);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for command")?;
        Ok(output.into())
    }
}
