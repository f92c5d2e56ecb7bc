//! Bundle graph: the root application unit plus one unit per discovered plugin.
//!
//! Building the graph is pure. Discovery runs first and hands over an
//! immutable descriptor list; [`BundleGraph::build`] only composes and
//! validates, so it can be exercised against synthetic units.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::discovery::{DiscoveryMode, DiscoverySource, ExtensionDescriptor};
use crate::error::{DiscoveryError, DuplicateOutputError};
use crate::rewrite::RewriteTable;

/// Per-unit output options.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptimizationSettings {
    /// Pipe the bundle through the configured JS minifier.
    #[serde(default)]
    pub minify: bool,

    /// Append a `//# sourceURL=` marker after each module.
    #[serde(default)]
    pub source_url: bool,
}

/// One independently built output artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleUnit {
    pub name: String,
    pub entry_module: String,
    pub output_file: PathBuf,
    pub base_url: PathBuf,

    #[serde(default)]
    pub path_aliases: BTreeMap<String, String>,

    /// Extra module ids bundled after the entry module.
    #[serde(default)]
    pub include: Vec<String>,

    /// Module ids left out of the bundle (loaded at runtime instead).
    #[serde(default)]
    pub exclude: Vec<String>,

    #[serde(default)]
    pub optimization: OptimizationSettings,
}

impl BundleUnit {
    pub fn new(
        name: impl Into<String>,
        entry_module: impl Into<String>,
        base_url: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            entry_module: entry_module.into(),
            output_file: output_file.into(),
            base_url: base_url.into(),
            path_aliases: BTreeMap::new(),
            include: Vec::new(),
            exclude: Vec::new(),
            optimization: OptimizationSettings::default(),
        }
    }

    pub fn from_descriptor(
        desc: &ExtensionDescriptor,
        optimization: &OptimizationSettings,
    ) -> Self {
        Self {
            name: desc.name.clone(),
            entry_module: desc.entry_module.clone(),
            output_file: desc.output_path.clone(),
            base_url: desc.base_url.clone(),
            path_aliases: desc.path_aliases.clone(),
            include: Vec::new(),
            exclude: Vec::new(),
            optimization: optimization.clone(),
        }
    }
}

/// Run every discovery source and fold the results into bundle units.
///
/// `unit` sources yield new units; `include` sources extend `root.include`.
pub fn discover_units(
    root: &mut BundleUnit,
    sources: &[DiscoverySource],
    dest_root: &Path,
    optimization: &OptimizationSettings,
) -> Result<Vec<BundleUnit>, DiscoveryError> {
    let mut units = Vec::new();
    for source in sources {
        let found = source.discover(dest_root)?;
        match source.mode {
            DiscoveryMode::Unit => units.extend(
                found
                    .iter()
                    .map(|d| BundleUnit::from_descriptor(d, optimization)),
            ),
            DiscoveryMode::Include => root.include.extend(source.include_ids(&found)),
        }
    }
    Ok(units)
}

/// Validated set of bundle units sharing one rewrite table.
#[derive(Debug, Clone)]
pub struct BundleGraph {
    units: Vec<BundleUnit>,
    rewrites: Arc<RewriteTable>,
}

impl BundleGraph {
    /// Compose the root unit with discovered units.
    ///
    /// Fails before any bundling if two units share an output file.
    pub fn build(
        root: BundleUnit,
        discovered: Vec<BundleUnit>,
        rewrites: Arc<RewriteTable>,
    ) -> Result<Self, DuplicateOutputError> {
        let mut units = Vec::with_capacity(discovered.len() + 1);
        units.push(root);
        units.extend(discovered);

        let mut seen: HashMap<&Path, &str> = HashMap::new();
        for unit in &units {
            if let Some(first) = seen.insert(unit.output_file.as_path(), unit.name.as_str()) {
                return Err(DuplicateOutputError {
                    output: unit.output_file.clone(),
                    first: first.to_string(),
                    second: unit.name.clone(),
                });
            }
        }

        Ok(Self { units, rewrites })
    }

    pub fn units(&self) -> &[BundleUnit] {
        &self.units
    }

    pub fn root(&self) -> &BundleUnit {
        &self.units[0]
    }

    /// The rewrite hook attached to every unit.
    pub fn rewrites(&self) -> &RewriteTable {
        &self.rewrites
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
