//! Error taxonomy for rebundle build components.
//!
//! Every component owns one error enum; [`BuildError`] wraps them so a
//! pipeline stage can report whichever one halted it.

use std::path::PathBuf;

use crate::git::GitError;

/// Failures while resetting a vendored tree or applying its patches.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("patch set {set}: cannot reset {} to {revision}: {source}", repo.display())]
    Reset {
        set: String,
        repo: PathBuf,
        revision: String,
        #[source]
        source: GitError,
    },

    #[error(
        "patch set {set}: {} is not a work-tree root (enclosing tree: {})",
        repo.display(),
        toplevel.display()
    )]
    NotRepoRoot {
        set: String,
        repo: PathBuf,
        toplevel: PathBuf,
    },

    #[error("patch set {set}: HEAD is {actual} after reset, expected {expected}")]
    RevisionMismatch {
        set: String,
        expected: String,
        actual: String,
    },

    #[error("patch set {set}: patch #{index} not found: {}", path.display())]
    MissingPatch {
        set: String,
        index: usize,
        path: PathBuf,
    },

    #[error("patch set {set}: patch #{index} ({}) does not apply: {reason}", path.display())]
    Conflict {
        set: String,
        index: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("patch set {set}: patch #{index} ({}) is malformed: {reason}", path.display())]
    Malformed {
        set: String,
        index: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("{failed} of {total} patch sets failed, first: {first}")]
    SetsFailed {
        failed: usize,
        total: usize,
        first: Box<PatchError>,
    },
}

impl PatchError {
    /// Index of the failing patch within its set, when the failure is tied to one.
    pub fn patch_index(&self) -> Option<usize> {
        match self {
            PatchError::MissingPatch { index, .. }
            | PatchError::Conflict { index, .. }
            | PatchError::Malformed { index, .. } => Some(*index),
            PatchError::SetsFailed { first, .. } => first.patch_index(),
            _ => None,
        }
    }
}

/// Malformed rewrite rules or rules that no longer fit the upstream source.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("module {module}: substitution #{index} has an invalid pattern: {reason}")]
    InvalidPattern {
        module: String,
        index: usize,
        reason: String,
    },

    #[error("module {module}: substitution #{index} has an empty match")]
    EmptyMatch { module: String, index: usize },

    #[error("module {module}: substitution #{index} matched nothing: {find:?}")]
    NoMatch {
        module: String,
        index: usize,
        find: String,
    },

    #[error("module {module}: cannot read replacement source {}: {source}", path.display())]
    ShimUnreadable {
        module: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Discovery only fails when the root itself cannot be listed.
#[derive(Debug, thiserror::Error)]
#[error("cannot read discovery root {}: {source}", root.display())]
pub struct DiscoveryError {
    pub root: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Two bundle units would write the same output file.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bundle units {first} and {second} both write {}", output.display())]
pub struct DuplicateOutputError {
    pub output: PathBuf,
    pub first: String,
    pub second: String,
}

/// Failures while bundling a single unit.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error("unit {unit}: module {module} not found at {}", path.display())]
    ModuleNotFound {
        unit: String,
        module: String,
        path: PathBuf,
    },

    #[error("unit {unit}: cannot read {}: {source}", path.display())]
    Read {
        unit: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unit {unit}: cannot write {}: {source}", path.display())]
    Write {
        unit: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unit {unit}: {source}")]
    Rewrite {
        unit: String,
        #[source]
        source: RewriteError,
    },

    #[error("unit {unit}: module scanner pattern failed to compile: {source}")]
    Pattern {
        unit: String,
        #[source]
        source: regex::Error,
    },

    #[error("unit {unit}: minifier failed: {source}")]
    Minify {
        unit: String,
        #[source]
        source: ToolError,
    },
}

impl BundleError {
    pub fn is_rewrite(&self) -> bool {
        matches!(self, BundleError::Rewrite { .. })
    }
}

/// Copy manifest failures, tagged with the rule that produced them.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("copy rule #{rule}: source root {} does not exist", root.display())]
    MissingSourceRoot { rule: usize, root: PathBuf },

    #[error("copy rule #{rule}: invalid glob {pattern:?}: {reason}")]
    InvalidGlob {
        rule: usize,
        pattern: String,
        reason: String,
    },

    #[error("copy rule #{rule}: {}: {source}", path.display())]
    Io {
        rule: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Gzip stage failures.
#[derive(Debug, thiserror::Error)]
pub enum CompressError {
    #[error("compress rule #{rule}: root {} does not exist", root.display())]
    MissingRoot { rule: usize, root: PathBuf },

    #[error("compress rule #{rule}: invalid glob {pattern:?}: {reason}")]
    InvalidGlob {
        rule: usize,
        pattern: String,
        reason: String,
    },

    #[error("compress rule #{rule}: {}: {source}", path.display())]
    Io {
        rule: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// HTML template processing failures.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: unterminated {kind} block", path.display())]
    Unterminated {
        path: PathBuf,
        line: usize,
        kind: &'static str,
    },

    #[error("{}:{line}: {message}", path.display())]
    Syntax {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("placeholder #{index} in {}: {find:?} not found", path.display())]
    PlaceholderMissing {
        index: usize,
        path: PathBuf,
        find: String,
    },
}

/// Build metadata stamping failures.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} must contain a JSON object", path.display())]
    NotAnObject { path: PathBuf },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Packaging failures for the publish entry point.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("cannot scan {}: {source}", root.display())]
    Scan {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// A directory could not be hidden; already-hidden ones were restored first.
    #[error("cannot rename {} to {}: {source}", from.display(), to.display())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "failed to restore {} hidden directories, first: {}",
        paths.len(),
        paths.first().map(|p| p.display().to_string()).unwrap_or_default()
    )]
    Restore { paths: Vec<PathBuf> },

    #[error("publish command failed: {0}")]
    Command(#[source] ToolError),
}

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// External tool invocation failures.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} has an empty command")]
    EmptyCommand { tool: String },

    #[error("cannot start {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with code {code}: {stderr}")]
    Failed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },
}

/// Any error that can halt a build stage.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Rewrite(#[from] RewriteError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    DuplicateOutput(#[from] DuplicateOutputError),

    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error(transparent)]
    Copy(#[from] CopyError),

    #[error(transparent)]
    Compress(#[from] CompressError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for rebundle build operations.
pub type Result<T> = std::result::Result<T, BuildError>;
