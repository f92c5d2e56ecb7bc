//! Package publishing with nested dependency directories hidden.
//!
//! Every `node_modules` directory under the package root is renamed to
//! `node_modules_` (deepest first) while the publish command runs, then
//! renamed back shallowest first. Names are restored on every exit path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use walkdir::WalkDir;

use crate::error::PublishError;
use crate::tool;

const HIDDEN_DIR: &str = "node_modules";
const HIDDEN_SUFFIX: &str = "_";

fn default_command() -> Vec<String> {
    vec!["npm".into(), "publish".into()]
}

fn default_simulate() -> Vec<String> {
    vec!["npm".into(), "install".into(), "-g".into()]
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishSpec {
    /// Package directory the command runs in.
    pub root: PathBuf,
    #[serde(default = "default_command")]
    pub command: Vec<String>,
    /// Command used by `publish --simulate`.
    #[serde(default = "default_simulate")]
    pub simulate: Vec<String>,
}

impl PublishSpec {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            command: default_command(),
            simulate: default_simulate(),
        }
    }
}

/// Every `node_modules` directory under `root`, deepest first.
pub fn find_dependency_dirs(root: &Path) -> Result<Vec<PathBuf>, PublishError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| PublishError::Scan {
            root: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_dir() && entry.file_name() == HIDDEN_DIR {
            found.push(entry.into_path());
        }
    }
    found.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    Ok(found)
}

fn hidden_name(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(HIDDEN_SUFFIX);
    PathBuf::from(name)
}

/// Renamed directories; dropping the guard renames them back.
#[derive(Debug)]
pub struct HiddenDirs {
    hidden: Vec<PathBuf>,
    restored: bool,
}

impl HiddenDirs {
    /// Rename `dirs` in order. On failure the already-renamed ones are restored
    /// before the error is returned.
    pub fn hide(dirs: &[PathBuf]) -> Result<Self, PublishError> {
        let mut guard = Self {
            hidden: Vec::with_capacity(dirs.len()),
            restored: false,
        };
        for dir in dirs {
            let to = hidden_name(dir);
            if let Err(source) = std::fs::rename(dir, &to) {
                guard.restore_inner();
                return Err(PublishError::Rename {
                    from: dir.clone(),
                    to,
                    source,
                });
            }
            debug!(dir = %dir.display(), "hidden");
            guard.hidden.push(dir.clone());
        }
        Ok(guard)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.hidden
    }

    /// Restore original names, reporting any directory left renamed.
    pub fn restore(mut self) -> Result<(), PublishError> {
        let failed = self.restore_inner();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(PublishError::Restore { paths: failed })
        }
    }

    // Hiding ran deepest first, so restoring in reverse brings parents back
    // before their children.
    fn restore_inner(&mut self) -> Vec<PathBuf> {
        self.restored = true;
        let mut failed = Vec::new();
        for dir in self.hidden.drain(..).rev() {
            let from = hidden_name(&dir);
            match std::fs::rename(&from, &dir) {
                Ok(()) => debug!(dir = %dir.display(), "restored"),
                Err(e) => {
                    error!(dir = %dir.display(), error = %e, "cannot restore directory");
                    failed.push(dir);
                }
            }
        }
        failed
    }
}

impl Drop for HiddenDirs {
    fn drop(&mut self) {
        if !self.restored {
            self.restore_inner();
        }
    }
}

/// Hide dependency directories, run the publish (or simulate) command, restore.
///
/// A command failure is reported after names are restored; a restore failure
/// takes precedence because it leaves the tree modified.
pub fn publish(spec: &PublishSpec, simulate: bool) -> Result<usize, PublishError> {
    let command = if simulate { &spec.simulate } else { &spec.command };
    let dirs = find_dependency_dirs(&spec.root)?;
    info!(root = %spec.root.display(), hidden = dirs.len(), simulate, "publishing package");

    let guard = HiddenDirs::hide(&dirs)?;
    let outcome = tool::run_in("publish", command, &spec.root);
    guard.restore()?;

    outcome.map_err(PublishError::Command)?;
    Ok(dirs.len())
}
