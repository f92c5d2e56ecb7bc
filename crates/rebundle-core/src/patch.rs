//! Patch registry: pinned vendored trees and the ordered patches applied to them.
//!
//! Every build resets each tree to its pinned revision before applying the
//! patches again, so re-running a build never double-applies. `git apply` is
//! all-or-nothing per patch file: a conflicting patch leaves the tree exactly
//! as the previous patch left it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PatchError;
use crate::git::{self, GitError};
use crate::obs;

fn default_true() -> bool {
    true
}

/// An ordered group of patches applied against a pinned revision of one tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatchSet {
    /// Label used in logs and errors.
    pub name: String,

    /// Working tree the patches apply to.
    pub repository: PathBuf,

    /// Commit id (or any revision git can resolve) the tree is reset to.
    pub revision: String,

    /// Patch files, applied in listed order.
    #[serde(default)]
    pub patches: Vec<PathBuf>,

    /// Also remove untracked files on reset, so patches that add files reapply.
    #[serde(default = "default_true")]
    pub clean_untracked: bool,
}

impl PatchSet {
    pub fn new(
        name: impl Into<String>,
        repository: impl Into<PathBuf>,
        revision: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            repository: repository.into(),
            revision: revision.into(),
            patches: Vec::new(),
            clean_untracked: true,
        }
    }

    pub fn with_patch(mut self, patch: impl Into<PathBuf>) -> Self {
        self.patches.push(patch.into());
        self
    }
}

/// Outcome of resetting and patching one set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub set: String,
    /// Commit the tree was reset to.
    pub base: String,
    pub applied: usize,
}

/// Ordered collection of patch sets, one per vendored dependency.
#[derive(Debug, Clone, Default)]
pub struct PatchRegistry {
    sets: Vec<PatchSet>,
}

impl PatchRegistry {
    pub fn new(sets: Vec<PatchSet>) -> Self {
        Self { sets }
    }

    pub fn sets(&self) -> &[PatchSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Fail unless `set.repository` is the top of its own git work tree.
    ///
    /// Reset and clean act on the whole work tree, and `git apply` silently
    /// skips paths outside the current subdirectory, so a nested directory
    /// must never be treated as the vendored tree.
    pub fn ensure_repo_root(set: &PatchSet) -> Result<(), PatchError> {
        let reset_err = |source: GitError| PatchError::Reset {
            set: set.name.clone(),
            repo: set.repository.clone(),
            revision: set.revision.clone(),
            source,
        };
        let canonical = |path: &Path| {
            path.canonicalize().map_err(|e| GitError {
                args: "rev-parse --show-toplevel".to_string(),
                message: format!("cannot resolve {}: {e}", path.display()),
            })
        };

        let repo = canonical(&set.repository).map_err(reset_err)?;
        let toplevel = git::show_toplevel(&repo).map_err(reset_err)?;
        let toplevel = canonical(&toplevel).map_err(reset_err)?;
        if toplevel != repo {
            return Err(PatchError::NotRepoRoot {
                set: set.name.clone(),
                repo: set.repository.clone(),
                toplevel,
            });
        }
        Ok(())
    }

    /// Hard-reset the set's tree to its pinned revision, discarding local changes.
    ///
    /// Returns the full commit id the tree now sits on.
    pub fn reset(set: &PatchSet) -> Result<String, PatchError> {
        Self::ensure_repo_root(set)?;

        let repo = set.repository.as_path();
        let reset_err = |source: GitError| PatchError::Reset {
            set: set.name.clone(),
            repo: set.repository.clone(),
            revision: set.revision.clone(),
            source,
        };

        let expected = git::resolve_revision(repo, &set.revision).map_err(reset_err)?;
        git::run_git(repo, &["reset", "--hard", "--quiet", &expected]).map_err(reset_err)?;
        if set.clean_untracked {
            git::run_git(repo, &["clean", "-fdq"]).map_err(reset_err)?;
        }

        let actual = git::capture_head_sha(repo).map_err(reset_err)?;
        if actual != expected {
            return Err(PatchError::RevisionMismatch {
                set: set.name.clone(),
                expected,
                actual,
            });
        }

        debug!(set = %set.name, base = %actual, "tree reset");
        Ok(actual)
    }

    /// Apply the set's patches in order against the current tree.
    ///
    /// Stops at the first patch that is missing, malformed or conflicting.
    /// Patches before it stay applied; the failing one is not applied at all.
    pub fn apply(set: &PatchSet) -> Result<usize, PatchError> {
        Self::ensure_repo_root(set)?;

        for (index, patch) in set.patches.iter().enumerate() {
            if !patch.is_file() {
                return Err(PatchError::MissingPatch {
                    set: set.name.clone(),
                    index,
                    path: patch.clone(),
                });
            }

            let patch_arg = absolute(patch);
            let patch_str = patch_arg.to_string_lossy();
            let args = ["apply", "--whitespace=nowarn", patch_str.as_ref()];
            if let Err(e) = git::run_git(&set.repository, &args) {
                return Err(classify_apply_failure(set, index, patch, e));
            }

            obs::emit_patch_applied(&set.name, index, patch);
        }

        Ok(set.patches.len())
    }

    /// Reset then apply one set.
    pub fn reset_and_apply(set: &PatchSet) -> Result<PatchReport, PatchError> {
        let base = Self::reset(set)?;
        let applied = Self::apply(set)?;
        info!(set = %set.name, base = %base, applied, "patch set applied");
        Ok(PatchReport {
            set: set.name.clone(),
            base,
            applied,
        })
    }

    /// Reset and patch every set in registry order.
    ///
    /// Sets are independent: a failing set does not stop later ones from being
    /// attempted. Any failure still fails the whole call.
    pub fn apply_all(&self) -> Result<Vec<PatchReport>, PatchError> {
        let mut reports = Vec::with_capacity(self.sets.len());
        let mut failures = Vec::new();

        for set in &self.sets {
            match Self::reset_and_apply(set) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(set = %set.name, error = %e, "patch set failed");
                    failures.push(e);
                }
            }
        }

        let total = self.sets.len();
        let failed = failures.len();
        match failures.into_iter().next() {
            None => Ok(reports),
            Some(first) if total == 1 => Err(first),
            Some(first) => Err(PatchError::SetsFailed {
                failed,
                total,
                first: Box::new(first),
            }),
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

fn classify_apply_failure(set: &PatchSet, index: usize, patch: &Path, err: GitError) -> PatchError {
    const MALFORMED: &[&str] = &[
        "corrupt patch",
        "No valid patches",
        "patch fragment without header",
        "unrecognized input",
    ];

    if MALFORMED.iter().any(|m| err.message.contains(m)) {
        PatchError::Malformed {
            set: set.name.clone(),
            index,
            path: patch.to_path_buf(),
            reason: err.message,
        }
    } else {
        PatchError::Conflict {
            set: set.name.clone(),
            index,
            path: patch.to_path_buf(),
            reason: err.message,
        }
    }
}
