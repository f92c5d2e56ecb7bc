//! Blocking invocation of external tools (minifiers, package publishers).

use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::error::ToolError;

fn split(tool: &str, command: &[String]) -> Result<(String, Vec<String>), ToolError> {
    match command.split_first() {
        Some((exe, args)) => Ok((exe.clone(), args.to_vec())),
        None => Err(ToolError::EmptyCommand {
            tool: tool.to_string(),
        }),
    }
}

/// Run `command` as a filter: `input` on stdin, stdout returned.
pub fn run_filter(tool: &str, command: &[String], input: &[u8]) -> Result<Vec<u8>, ToolError> {
    let (exe, args) = split(tool, command)?;
    let spawn_err = |e| ToolError::Spawn {
        tool: tool.to_string(),
        source: e,
    };

    let mut child = Command::new(exe)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;

    // Feed stdin from a separate thread so a full stdout pipe cannot deadlock us.
    let mut stdin = child.stdin.take();
    let payload = input.to_vec();
    let writer = std::thread::spawn(move || {
        if let Some(stdin) = stdin.as_mut() {
            let _ = stdin.write_all(&payload);
        }
    });

    let output = child.wait_with_output().map_err(spawn_err)?;
    let _ = writer.join();

    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Run `command` in `dir`, inheriting stdout/stderr.
pub fn run_in(tool: &str, command: &[String], dir: &Path) -> Result<(), ToolError> {
    let (exe, args) = split(tool, command)?;
    let status = Command::new(exe)
        .args(args)
        .current_dir(dir)
        .status()
        .map_err(|e| ToolError::Spawn {
            tool: tool.to_string(),
            source: e,
        })?;

    if !status.success() {
        return Err(ToolError::Failed {
            tool: tool.to_string(),
            code: status.code().unwrap_or(-1),
            stderr: String::new(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn filter_round_trips_through_cat() {
        let out = run_filter("cat", &cmd(&["cat"]), b"var a = 1;").unwrap();
        assert_eq!(out, b"var a = 1;");
    }

    #[test]
    fn filter_reports_failure() {
        let err = run_filter("false", &cmd(&["false"]), b"").unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = run_in("nothing", &[], Path::new(".")).unwrap_err();
        assert!(matches!(err, ToolError::EmptyCommand { .. }));
    }

    #[test]
    fn run_in_uses_directory() {
        let dir = tempfile::tempdir().unwrap();
        run_in("touch", &cmd(&["touch", "marker"]), dir.path()).unwrap();
        assert!(dir.path().join("marker").exists());
    }
}
