//! Extension discovery: turn plugin directories on disk into bundle descriptors.
//!
//! Discovery is a pure snapshot of one directory level. It never recurses,
//! and its output is sorted by directory name so two scans of the same tree
//! produce identical descriptor lists regardless of `read_dir` order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DiscoveryError;

const NAME_PLACEHOLDER: &str = "{name}";

fn default_entry_file() -> String {
    "main.js".to_string()
}

fn default_output() -> String {
    "{name}/main.js".to_string()
}

/// How discovered directories join the bundle graph.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Every directory becomes its own bundle unit.
    #[default]
    Unit,
    /// Every directory contributes one module id to the root unit's include list.
    Include,
}

/// A root directory scanned for plugin subdirectories.
///
/// `entry_file`, `output` and `include_module` may contain `{name}`, which
/// expands to the subdirectory name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoverySource {
    pub name: String,
    pub root: PathBuf,

    #[serde(default = "default_entry_file")]
    pub entry_file: String,

    #[serde(default)]
    pub denylist: Vec<String>,

    #[serde(default)]
    pub mode: DiscoveryMode,

    /// Output file template, relative to the destination root.
    #[serde(default = "default_output")]
    pub output: String,

    /// Path aliases given to every unit from this source.
    #[serde(default)]
    pub path_aliases: BTreeMap<String, String>,

    /// Module id template used in `include` mode.
    #[serde(default)]
    pub include_module: Option<String>,
}

impl DiscoverySource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            entry_file: default_entry_file(),
            denylist: Vec::new(),
            mode: DiscoveryMode::Unit,
            output: default_output(),
            path_aliases: BTreeMap::new(),
            include_module: None,
        }
    }

    pub fn deny(mut self, name: impl Into<String>) -> Self {
        self.denylist.push(name.into());
        self
    }

    /// Discover descriptors under this source, placing outputs below `dest_root`.
    pub fn discover(&self, dest_root: &Path) -> Result<Vec<ExtensionDescriptor>, DiscoveryError> {
        let names = scan(&self.root, &self.entry_file, &self.denylist)?;
        Ok(names
            .into_iter()
            .map(|name| self.describe(&name, dest_root))
            .collect())
    }

    /// Module ids for `include` mode, one per descriptor.
    pub fn include_ids(&self, descriptors: &[ExtensionDescriptor]) -> Vec<String> {
        let template = self
            .include_module
            .as_deref()
            .unwrap_or("{name}/{name}");
        descriptors
            .iter()
            .map(|d| expand(template, &d.name))
            .collect()
    }

    fn describe(&self, name: &str, dest_root: &Path) -> ExtensionDescriptor {
        let directory = self.root.join(name);
        let entry_point = PathBuf::from(expand(&self.entry_file, name));
        ExtensionDescriptor {
            name: name.to_string(),
            entry_module: module_id_of(&entry_point),
            output_path: dest_root.join(expand(&self.output, name)),
            base_url: directory.clone(),
            directory,
            entry_point,
            path_aliases: self.path_aliases.clone(),
        }
    }
}

/// Metadata for one discovered plugin directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionDescriptor {
    pub name: String,
    pub directory: PathBuf,
    /// Entry file relative to `directory`.
    pub entry_point: PathBuf,
    /// Entry module id (entry path without `.js`).
    pub entry_module: String,
    pub output_path: PathBuf,
    pub base_url: PathBuf,
    pub path_aliases: BTreeMap<String, String>,
}

/// Names of immediate subdirectories of `root` that contain `entry_file`
/// and are not denylisted, sorted.
///
/// A root with no matches yields an empty list; only an unreadable root fails.
pub fn scan(
    root: &Path,
    entry_file: &str,
    denylist: &[String],
) -> Result<Vec<String>, DiscoveryError> {
    let entries = fs::read_dir(root).map_err(|e| DiscoveryError {
        root: root.to_path_buf(),
        source: e,
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DiscoveryError {
            root: root.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!(path = %path.display(), "skipping non UTF-8 directory name");
            continue;
        };
        if denylist.iter().any(|d| d == &name) {
            debug!(dir = %name, "denylisted");
            continue;
        }
        if !path.join(expand(entry_file, &name)).is_file() {
            continue;
        }
        found.push(name);
    }

    found.sort();
    Ok(found)
}

fn expand(template: &str, name: &str) -> String {
    template.replace(NAME_PLACEHOLDER, name)
}

/// `a/b/main.js` -> `a/b/main`.
pub(crate) fn module_id_of(path: &Path) -> String {
    let id = path.to_string_lossy().replace('\\', "/");
    id.strip_suffix(".js").map(str::to_string).unwrap_or(id)
}
