//! rebundle core library
//!
//! Building blocks for patching, rewriting, discovering, bundling and
//! packaging a vendored web application. The pipeline crate sequences them.

pub mod bundler;
pub mod compress;
pub mod config;
pub mod discovery;
pub mod error;
pub mod git;
pub mod graph;
pub mod html;
pub mod manifest;
pub mod metadata;
pub mod obs;
pub mod patch;
pub mod publish;
pub mod rewrite;
pub mod telemetry;
pub mod tool;

pub use bundler::{BundleOutput, Bundler, ModuleBundler};
pub use compress::{compress, CompressReport, CompressRule};
pub use config::{BuildConfig, RewriteErrorPolicy};
pub use discovery::{DiscoveryMode, DiscoverySource, ExtensionDescriptor};
pub use error::{
    BuildError, BundleError, CompressError, ConfigError, CopyError, DiscoveryError,
    DuplicateOutputError, MetadataError, PatchError, PublishError, Result,
    RewriteError, TemplateError, ToolError,
};
pub use git::{capture_head_sha, is_git_repo, GitError};
pub use graph::{discover_units, BundleGraph, BundleUnit, OptimizationSettings};
pub use html::{AssetKind, ConcatPlan, Placeholder, TemplateSpec};
pub use manifest::{copy, CopyReport, CopyRule, PathFilter};
pub use metadata::{BuildStamp, MetadataSpec};
pub use patch::{PatchRegistry, PatchReport, PatchSet};
pub use publish::{HiddenDirs, PublishSpec};
pub use rewrite::{RewriteHook, RewriteRule, RewriteSpec, RewriteTable, Substitution};
