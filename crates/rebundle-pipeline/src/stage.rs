//! Stage definitions: the fixed build stages and command stages.

use std::path::PathBuf;

use async_trait::async_trait;
use rebundle_core::BuildError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::context::BuildContext;
use crate::runner::ToolRunner;

/// Lifecycle of one stage within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// A unit of pipeline work.
///
/// Stages see the filesystem state left by every stage before them and the
/// shared [`BuildContext`]. A returned error halts the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Stages that must have completed before this one.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run the stage and return a JSON summary for the report.
    async fn run(&self, ctx: &mut BuildContext) -> Result<Value, BuildError>;
}

/// The build stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStage {
    /// Remove previous outputs.
    Clean,
    /// Reset patched trees to their pinned revision and apply patch sets.
    Patch,
    /// Run the style compiler.
    Style,
    /// Select target-specific sections of the entry page.
    Template,
    /// Literal replacements in generated files.
    Placeholders,
    /// Parse build blocks into concatenation plans.
    BundlePrepare,
    /// Copy (and minify) entry pages into dist.
    HtmlMinify,
    /// Discover units, build the graph and bundle every unit.
    Bundle,
    /// Execute concatenation plans.
    Concat,
    /// Asset copy manifest.
    Copy,
    /// Point pages at the concatenated outputs.
    RewriteReferences,
    /// Gzip siblings.
    Compress,
    /// Stamp build metadata.
    Metadata,
}

impl BuiltinStage {
    pub const ALL: [BuiltinStage; 13] = [
        BuiltinStage::Clean,
        BuiltinStage::Patch,
        BuiltinStage::Style,
        BuiltinStage::Template,
        BuiltinStage::Placeholders,
        BuiltinStage::BundlePrepare,
        BuiltinStage::HtmlMinify,
        BuiltinStage::Bundle,
        BuiltinStage::Concat,
        BuiltinStage::Copy,
        BuiltinStage::RewriteReferences,
        BuiltinStage::Compress,
        BuiltinStage::Metadata,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStage::Clean => "clean",
            BuiltinStage::Patch => "patch",
            BuiltinStage::Style => "style",
            BuiltinStage::Template => "template",
            BuiltinStage::Placeholders => "placeholders",
            BuiltinStage::BundlePrepare => "bundle_prepare",
            BuiltinStage::HtmlMinify => "html_minify",
            BuiltinStage::Bundle => "bundle",
            BuiltinStage::Concat => "concat",
            BuiltinStage::Copy => "copy",
            BuiltinStage::RewriteReferences => "rewrite_references",
            BuiltinStage::Compress => "compress",
            BuiltinStage::Metadata => "metadata",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Stages whose output this one reads.
    pub fn requires(&self) -> &'static [BuiltinStage] {
        use BuiltinStage::*;
        match self {
            Clean => &[],
            Patch => &[Clean],
            Style => &[Patch],
            Template => &[Patch],
            Placeholders => &[Template],
            BundlePrepare => &[Placeholders],
            HtmlMinify => &[Clean, Placeholders],
            Bundle => &[Patch, BundlePrepare],
            Concat => &[BundlePrepare, Bundle],
            Copy => &[Style, Bundle],
            RewriteReferences => &[HtmlMinify, Concat, Copy],
            Compress => &[Bundle, Concat, Copy, RewriteReferences],
            Metadata => &[Compress],
        }
    }
}

/// An external command run as a stage (lint, test suite, style compiler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStage {
    pub name: String,
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub timeout_secs: u64,
    #[serde(default)]
    pub after: Vec<String>,
}

impl CommandStage {
    pub fn new(
        name: impl Into<String>,
        command: Vec<String>,
        cwd: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            name: name.into(),
            command,
            cwd: cwd.into(),
            timeout_secs,
            after: Vec::new(),
        }
    }

    pub fn after(mut self, stage: impl Into<String>) -> Self {
        self.after.push(stage.into());
        self
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.after.clone()
    }

    async fn run(&self, _ctx: &mut BuildContext) -> Result<Value, BuildError> {
        let result =
            ToolRunner::execute(&self.name, &self.command, &self.cwd, self.timeout_secs).await?;
        if !result.stdout.trim().is_empty() {
            info!(stage = %self.name, output = %result.stdout.trim_end(), "command output");
        }
        result.check()?;
        Ok(json!({
            "command": &self.command,
            "exit_code": result.exit_code,
            "duration_ms": result.duration_ms,
        }))
    }
}
