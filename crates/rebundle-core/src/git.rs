//! Git plumbing used by the patch registry and build metadata.

use std::path::{Path, PathBuf};
use std::process::Command;

/// A git invocation that could not be spawned or exited non-zero.
#[derive(Debug, Clone, thiserror::Error)]
#[error("git {args}: {message}")]
pub struct GitError {
    pub args: String,
    pub message: String,
}

/// Run `git <args>` in `dir` and return trimmed stdout.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String, GitError> {
    let joined = args.join(" ");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| GitError {
            args: joined.clone(),
            message: format!("failed to run git: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitError {
            args: joined,
            message: if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            },
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Resolve a revision expression (`HEAD`, a branch, a short sha) to a full commit id.
pub fn resolve_revision(repo_dir: &Path, revision: &str) -> Result<String, GitError> {
    let spec = format!("{revision}^{{commit}}");
    run_git(repo_dir, &["rev-parse", "--verify", "--quiet", &spec])
}

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String, GitError> {
    let sha = run_git(repo_dir, &["rev-parse", "HEAD"])?;
    if sha.is_empty() {
        return Err(GitError {
            args: "rev-parse HEAD".to_string(),
            message: "returned empty output".to_string(),
        });
    }
    Ok(sha)
}

/// Top-level directory of the work tree containing `dir`.
pub fn show_toplevel(dir: &Path) -> Result<PathBuf, GitError> {
    run_git(dir, &["rev-parse", "--show-toplevel"]).map(PathBuf::from)
}

/// Name of the checked-out branch, or `HEAD` when detached.
pub fn current_branch(repo_dir: &Path) -> Result<String, GitError> {
    run_git(repo_dir, &["rev-parse", "--abbrev-ref", "HEAD"])
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
