//! `rebundle.toml`: the single configuration structure handed to every stage.
//!
//! Relative paths are resolved against the directory holding the file
//! ([`BuildConfig::root`]) right after parsing, so nothing downstream depends
//! on the process working directory.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compress::{CompressRule, MAX_COMPRESSION_LEVEL};
use crate::discovery::DiscoverySource;
use crate::error::{ConfigError, RewriteError};
use crate::graph::{BundleUnit, OptimizationSettings};
use crate::html::{Placeholder, TemplateSpec};
use crate::manifest::CopyRule;
use crate::metadata::MetadataSpec;
use crate::patch::{PatchRegistry, PatchSet};
use crate::publish::PublishSpec;
use crate::rewrite::{RewriteSpec, RewriteTable};

/// File looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "rebundle.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_FILE`].
pub const CONFIG_ENV: &str = "REBUNDLE_CONFIG";

/// Default external command timeout in seconds.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 600;

/// Suite run by `test` without an argument.
pub const DEFAULT_TEST_SUITE: &str = "all";

fn default_source() -> PathBuf {
    PathBuf::from("src")
}

fn default_dist() -> PathBuf {
    PathBuf::from("dist")
}

fn default_server_dist() -> PathBuf {
    PathBuf::from("server-dist")
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TOOL_TIMEOUT_SECS
}

fn default_minify_globs() -> Vec<String> {
    vec!["*.html".into(), "!.*".into()]
}

fn default_rewrite_globs() -> Vec<String> {
    vec!["*.html".into(), "*/*.html".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathsConfig {
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
    #[serde(default = "default_server_dist")]
    pub server_dist: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            dist: default_dist(),
            server_dist: default_server_dist(),
        }
    }
}

/// `[bundle]`: the root application unit and settings for discovered units.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleConfig {
    pub root: BundleUnit,
    /// Applied to every unit produced by discovery.
    #[serde(default)]
    pub extensions: OptimizationSettings,
}

/// `[html]`: build-block parsing and page handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HtmlConfig {
    /// Page whose build blocks become concat plans; defaults to the template output.
    #[serde(default)]
    pub prepare: Option<PathBuf>,
    /// Pages under the source dir copied (and minified) into dist.
    #[serde(default = "default_minify_globs")]
    pub minify: Vec<String>,
    /// Pages under the dist dir whose build blocks are rewritten.
    #[serde(default = "default_rewrite_globs")]
    pub rewrite: Vec<String>,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            prepare: None,
            minify: default_minify_globs(),
            rewrite: default_rewrite_globs(),
        }
    }
}

/// `[tools]`: external commands. Each is an argv list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolsConfig {
    /// Style compiler, run in the config root.
    #[serde(default)]
    pub style: Option<Vec<String>>,
    /// HTML minifier, stdin to stdout.
    #[serde(default)]
    pub html_minify: Option<Vec<String>>,
    /// JS minifier, stdin to stdout.
    #[serde(default)]
    pub js_minify: Option<Vec<String>>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            style: None,
            html_minify: None,
            js_minify: None,
            timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
        }
    }
}

/// What a failing rewrite does to the build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RewriteErrorPolicy {
    /// Halt the pipeline.
    #[default]
    Abort,
    /// Log the error and drop only the affected unit's output.
    SkipUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    #[serde(default)]
    pub on_rewrite_error: RewriteErrorPolicy,
    /// A substitution that matches nothing is an error.
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            on_rewrite_error: RewriteErrorPolicy::Abort,
            strict: true,
        }
    }
}

/// Complete build configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildConfig {
    /// Directory relative paths resolve against. Set by the loader.
    #[serde(skip)]
    pub root: PathBuf,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Removed by the clean stage.
    #[serde(default)]
    pub clean: Vec<PathBuf>,

    #[serde(default)]
    pub patch_sets: Vec<PatchSet>,

    #[serde(default)]
    pub rewrites: BTreeMap<String, RewriteSpec>,

    #[serde(default)]
    pub bundle: Option<BundleConfig>,

    #[serde(default)]
    pub discovery: Vec<DiscoverySource>,

    #[serde(default)]
    pub template: Option<TemplateSpec>,

    #[serde(default)]
    pub placeholders: Vec<Placeholder>,

    #[serde(default)]
    pub html: HtmlConfig,

    #[serde(default)]
    pub copy: Vec<CopyRule>,

    #[serde(default)]
    pub compress: Vec<CompressRule>,

    #[serde(default)]
    pub metadata: Option<MetadataSpec>,

    #[serde(default)]
    pub tools: ToolsConfig,

    /// Lint name -> command, run by `check`.
    #[serde(default)]
    pub lint: BTreeMap<String, Vec<String>>,

    /// Suite name -> command, run by `test`.
    #[serde(default)]
    pub test: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub publish: Option<PublishSpec>,

    #[serde(default)]
    pub policy: PolicyConfig,
}

impl BuildConfig {
    /// Read, resolve and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let root = std::fs::canonicalize(dir).map_err(|source| ConfigError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, &root).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse `text` as if it were a file in `root`.
    pub fn from_toml_str(text: &str, root: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: root.join(DEFAULT_CONFIG_FILE),
            source,
        })?;
        config.resolve(root);
        config.validate()?;
        Ok(config)
    }

    fn resolve(&mut self, root: &Path) {
        let abs = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };

        self.root = root.to_path_buf();
        abs(&mut self.paths.source);
        abs(&mut self.paths.dist);
        abs(&mut self.paths.server_dist);
        self.clean.iter_mut().for_each(abs);

        for set in &mut self.patch_sets {
            abs(&mut set.repository);
            set.patches.iter_mut().for_each(abs);
        }
        if let Some(bundle) = &mut self.bundle {
            abs(&mut bundle.root.base_url);
            abs(&mut bundle.root.output_file);
        }
        for source in &mut self.discovery {
            abs(&mut source.root);
        }
        if let Some(t) = &mut self.template {
            abs(&mut t.source);
            abs(&mut t.output);
        }
        for p in &mut self.placeholders {
            abs(&mut p.file);
        }
        if let Some(p) = &mut self.html.prepare {
            abs(p);
        }
        for rule in &mut self.copy {
            abs(&mut rule.source_root);
            abs(&mut rule.destination_root);
        }
        for rule in &mut self.compress {
            abs(&mut rule.root);
        }
        if let Some(m) = &mut self.metadata {
            abs(&mut m.source);
            abs(&mut m.output);
            if let Some(repo) = &mut m.repository {
                abs(repo);
            }
        }
        if let Some(p) = &mut self.publish {
            abs(&mut p.root);
        }
    }

    /// Reject configurations that would only fail mid-build.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        for (section, commands) in [("lint", &self.lint), ("test", &self.test)] {
            for (name, command) in commands {
                if name.trim().is_empty() {
                    return invalid(format!("[{section}] has an entry with an empty name"));
                }
                if command.is_empty() {
                    return invalid(format!("[{section}] {name} has an empty command"));
                }
            }
        }

        for (tool, command) in [
            ("style", &self.tools.style),
            ("html_minify", &self.tools.html_minify),
            ("js_minify", &self.tools.js_minify),
        ] {
            if command.as_ref().is_some_and(Vec::is_empty) {
                return invalid(format!("[tools] {tool} has an empty command"));
            }
        }
        if self.tools.timeout_secs == 0 {
            return invalid("[tools] timeout_secs must be positive".to_string());
        }

        for path in &self.clean {
            let escapes = path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
            if escapes || !path.starts_with(&self.root) || path == &self.root {
                return invalid(format!(
                    "clean path {} must lie inside {}",
                    path.display(),
                    self.root.display()
                ));
            }
        }

        let mut names = HashSet::new();
        for set in &self.patch_sets {
            if set.name.trim().is_empty() {
                return invalid("patch set with an empty name".to_string());
            }
            if !names.insert(set.name.as_str()) {
                return invalid(format!("duplicate patch set {:?}", set.name));
            }
        }

        let mut sources = HashSet::new();
        for source in &self.discovery {
            if source.name.trim().is_empty() {
                return invalid("discovery source with an empty name".to_string());
            }
            if !sources.insert(source.name.as_str()) {
                return invalid(format!("duplicate discovery source {:?}", source.name));
            }
        }
        if !self.discovery.is_empty() && self.bundle.is_none() {
            return invalid("[[discovery]] requires a [bundle] section".to_string());
        }

        for (index, p) in self.placeholders.iter().enumerate() {
            if p.find.is_empty() {
                return invalid(format!("placeholder {index} has an empty find string"));
            }
        }

        for (index, rule) in self.compress.iter().enumerate() {
            if rule.level > MAX_COMPRESSION_LEVEL {
                return invalid(format!(
                    "[[compress]] rule {index}: level {} is outside 0..={MAX_COMPRESSION_LEVEL}",
                    rule.level
                ));
            }
        }

        if let Some(publish) = &self.publish {
            if publish.command.is_empty() || publish.simulate.is_empty() {
                return invalid("[publish] commands must not be empty".to_string());
            }
        }

        Ok(())
    }

    /// Patch sets as a registry.
    pub fn patch_registry(&self) -> PatchRegistry {
        PatchRegistry::new(self.patch_sets.clone())
    }

    /// Compile `[rewrites]`, reading shim files relative to the root.
    pub fn rewrite_table(&self) -> Result<RewriteTable, RewriteError> {
        RewriteTable::from_specs(&self.rewrites, &self.root, self.policy.strict)
    }

    /// Page parsed for build blocks, if any.
    pub fn prepare_page(&self) -> Option<&Path> {
        self.html
            .prepare
            .as_deref()
            .or_else(|| self.template.as_ref().map(|t| t.output.as_path()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
clean = ["dist", "server-dist"]

[paths]
source = "app/src"

[[patch_sets]]
name = "upstream"
repository = "app"
revision = "abc123"
patches = ["patches/01.patch", "patches/02.patch"]

[rewrites.fileSystemImpl]
replace_with = "hacks/fs.js"

[rewrites."command/Menus"]
substitutions = [{ find = "isNative", replace = "false" }]

[bundle.root]
name = "main"
entry_module = "main"
base_url = "app/src"
output_file = "dist/main.js"
include = ["brackets"]
exclude = ["text!config.json"]
path_aliases = { "hacks.app" = "../../hacks/app" }

[bundle.extensions]
minify = true

[[discovery]]
name = "default-extensions"
root = "app/src/extensions/default"
denylist = ["JSLint"]
output = "extensions/default/{name}/main.js"

[[discovery]]
name = "modes"
root = "app/src/thirdparty/CodeMirror/mode"
entry_file = "{name}.js"
mode = "include"
include_module = "thirdparty/CodeMirror/mode/{name}/{name}"

[template]
source = "app/src/index.html"
output = "app/src/.index.html"
target = "dist"

[[placeholders]]
file = "app/src/.index.html"
find = "<!-- build:js main.js -->"
replace = " "

[[copy]]
source_root = "app/src"
destination_root = "dist"
globs = ["extensions/default/*/**", "!extensions/default/*/main.js"]

[[compress]]
root = "dist"
globs = ["**/*.js", "!samples/**"]

[metadata]
source = "app/src/config.json"
output = "dist/config.json"
repository = "."

[tools]
js_minify = ["terser"]

[lint]
jshint = ["jshint", "src"]

[test]
all = ["mocha", "test"]
unit = ["mocha", "test/unit"]

[publish]
root = "server-dist"

[policy]
on_rewrite_error = "skip-unit"
"#;

    #[test]
    fn parses_and_resolves_paths() {
        let config = BuildConfig::from_toml_str(SAMPLE, Path::new("/work")).unwrap();
        assert_eq!(config.root, PathBuf::from("/work"));
        assert_eq!(config.paths.source, PathBuf::from("/work/app/src"));
        assert_eq!(config.paths.dist, PathBuf::from("/work/dist"));
        assert_eq!(config.clean[1], PathBuf::from("/work/server-dist"));
        assert_eq!(
            config.patch_sets[0].patches[1],
            PathBuf::from("/work/patches/02.patch")
        );
        assert!(config.patch_sets[0].clean_untracked);

        let bundle = config.bundle.as_ref().unwrap();
        assert_eq!(bundle.root.output_file, PathBuf::from("/work/dist/main.js"));
        assert!(bundle.extensions.minify);
        assert_eq!(config.discovery[0].entry_file, "main.js");
        assert_eq!(
            config.discovery[1].mode,
            crate::discovery::DiscoveryMode::Include
        );
        assert_eq!(config.copy[0].destination_root, PathBuf::from("/work/dist"));
        assert_eq!(config.compress[0].level, 6);
        assert_eq!(config.publish.as_ref().unwrap().command, ["npm", "publish"]);
        assert_eq!(config.policy.on_rewrite_error, RewriteErrorPolicy::SkipUnit);
        assert!(config.policy.strict);
        assert_eq!(
            config.prepare_page(),
            Some(Path::new("/work/app/src/.index.html"))
        );
        assert_eq!(config.html.rewrite, ["*.html", "*/*.html"]);
    }

    #[test]
    fn empty_file_is_valid() {
        let config = BuildConfig::from_toml_str("", Path::new("/w")).unwrap();
        assert!(config.patch_sets.is_empty());
        assert_eq!(config.paths.server_dist, PathBuf::from("/w/server-dist"));
        assert_eq!(config.tools.timeout_secs, DEFAULT_TOOL_TIMEOUT_SECS);
        assert_eq!(config.prepare_page(), None);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let err = BuildConfig::from_toml_str(
            "[policy]\non_rewrite_error = \"ignore\"\n",
            Path::new("/w"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn empty_lint_command_is_rejected() {
        let err = BuildConfig::from_toml_str("[lint]\njshint = []\n", Path::new("/w")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("jshint")));
    }

    #[test]
    fn duplicate_discovery_source_is_rejected() {
        let text = r#"
[bundle.root]
name = "main"
entry_module = "main"
base_url = "src"
output_file = "dist/main.js"

[[discovery]]
name = "ext"
root = "a"

[[discovery]]
name = "ext"
root = "b"
"#;
        let err = BuildConfig::from_toml_str(text, Path::new("/w")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("duplicate discovery")));
    }

    #[test]
    fn clean_outside_root_is_rejected() {
        for clean in ["clean = [\".\"]", "clean = [\"../x\"]", "clean = [\"/etc\"]"] {
            let err = BuildConfig::from_toml_str(clean, Path::new("/w")).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{clean}");
        }
    }

    #[test]
    fn compression_level_out_of_range_is_rejected() {
        let text = "[[compress]]\nroot = \"dist\"\nlevel = 12\n";
        let err = BuildConfig::from_toml_str(text, Path::new("/w")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("level 12")));

        let text = "[[compress]]\nroot = \"dist\"\nlevel = 9\n";
        assert!(BuildConfig::from_toml_str(text, Path::new("/w")).is_ok());
    }

    #[test]
    fn discovery_without_bundle_is_rejected() {
        let text = "[[discovery]]\nname = \"ext\"\nroot = \"a\"\n";
        assert!(BuildConfig::from_toml_str(text, Path::new("/w")).is_err());
    }

    #[test]
    fn load_resolves_against_file_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, "clean = [\"dist\"]\n").unwrap();

        let config = BuildConfig::load(&path).unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(config.root, root);
        assert_eq!(config.clean, [root.join("dist")]);
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "clean = [").unwrap();

        match BuildConfig::load(&path).unwrap_err() {
            ConfigError::Parse { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error: {other}"),
        }
    }
}
