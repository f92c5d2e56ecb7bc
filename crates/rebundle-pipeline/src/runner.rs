//! External command execution for command stages.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use rebundle_core::ToolError;
use tokio::process::Command;
use tracing::debug;

/// Result of one command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub name: String,

    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub success: bool,
}

impl CommandResult {
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Turn a non-zero exit into [`ToolError::Failed`].
    pub fn check(&self) -> Result<(), ToolError> {
        if self.passed() {
            Ok(())
        } else {
            Err(ToolError::Failed {
                tool: self.name.clone(),
                code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external commands with captured output and a timeout.
pub struct ToolRunner;

impl ToolRunner {
    /// Run `command` in `cwd`. A zero `timeout_secs` waits indefinitely.
    ///
    /// Spawn failures and timeouts are errors; a non-zero exit is reported in
    /// the result.
    pub async fn execute(
        name: &str,
        command: &[String],
        cwd: &Path,
        timeout_secs: u64,
    ) -> Result<CommandResult, ToolError> {
        let start = Instant::now();

        let Some((exe, args)) = command.split_first() else {
            return Err(ToolError::EmptyCommand {
                tool: name.to_string(),
            });
        };
        debug!(tool = %name, command = ?command, cwd = %cwd.display(), "spawning");

        let child = Command::new(exe)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolError::Spawn {
                tool: name.to_string(),
                source,
            })?;

        let waited = if timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
                .await
                .map_err(|_| ToolError::Timeout {
                    tool: name.to_string(),
                    secs: timeout_secs,
                })?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|source| ToolError::Spawn {
            tool: name.to_string(),
            source,
        })?;

        Ok(CommandResult {
            name: name.to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            success: output.status.success(),
        })
    }
}
