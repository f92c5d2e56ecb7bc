//! Module bundler for AMD-style sources.
//!
//! Resolves a unit's entry module and includes through its path aliases,
//! follows `require("..")` and `define([..])` dependencies, runs every module
//! through the rewrite hook and writes a dependency-first concatenation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::BundleError;
use crate::graph::BundleUnit;
use crate::obs;
use crate::rewrite::RewriteHook;
use crate::tool;

/// Ids the AMD loader provides itself.
const LOADER_IDS: &[&str] = &["require", "exports", "module"];

/// Result of bundling one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleOutput {
    pub unit: String,
    pub output_file: PathBuf,
    /// Module ids in emitted order.
    pub modules: Vec<String>,
    pub bytes: usize,
}

/// Produces one output artifact per bundle unit.
pub trait Bundler: Send + Sync {
    fn bundle(&self, unit: &BundleUnit, hook: &dyn RewriteHook)
        -> Result<BundleOutput, BundleError>;
}

/// Built-in concatenating bundler.
#[derive(Debug, Clone, Default)]
pub struct ModuleBundler {
    minify: Option<Vec<String>>,
}

impl ModuleBundler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minifier command (reads stdin, writes stdout) used for units with `minify` set.
    pub fn with_minifier(mut self, command: Vec<String>) -> Self {
        self.minify = Some(command);
        self
    }
}

impl Bundler for ModuleBundler {
    fn bundle(
        &self,
        unit: &BundleUnit,
        hook: &dyn RewriteHook,
    ) -> Result<BundleOutput, BundleError> {
        let patterns = AmdPatterns::get().map_err(|e| BundleError::Pattern {
            unit: unit.name.clone(),
            source: e,
        })?;
        let mut walk = Walk {
            unit,
            hook,
            patterns,
            seen: HashSet::new(),
            ordered: Vec::new(),
        };

        walk.visit(&unit.entry_module)?;
        for id in &unit.include {
            walk.visit(id)?;
        }

        let mut out = String::new();
        let mut modules = Vec::with_capacity(walk.ordered.len());
        for module in walk.ordered {
            out.push_str(&module.text);
            if !module.text.ends_with('\n') {
                out.push('\n');
            }
            if unit.optimization.source_url {
                out.push_str(&format!("//# sourceURL={}.js\n", module.id));
            }
            modules.push(module.id);
        }

        let bytes = match (&self.minify, unit.optimization.minify) {
            (Some(cmd), true) => tool::run_filter("js minifier", cmd, out.as_bytes())
                .map_err(|e| BundleError::Minify {
                    unit: unit.name.clone(),
                    source: e,
                })?,
            (None, true) => {
                warn!(unit = %unit.name, "minify requested but no js minifier configured");
                out.into_bytes()
            }
            _ => out.into_bytes(),
        };

        if let Some(parent) = unit.output_file.parent() {
            fs::create_dir_all(parent).map_err(|e| BundleError::Write {
                unit: unit.name.clone(),
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(&unit.output_file, &bytes).map_err(|e| BundleError::Write {
            unit: unit.name.clone(),
            path: unit.output_file.clone(),
            source: e,
        })?;

        obs::emit_unit_bundled(&unit.name, modules.len(), &unit.output_file);
        Ok(BundleOutput {
            unit: unit.name.clone(),
            output_file: unit.output_file.clone(),
            modules,
            bytes: bytes.len(),
        })
    }
}

struct LoadedModule {
    id: String,
    text: String,
}

struct Walk<'a> {
    unit: &'a BundleUnit,
    hook: &'a dyn RewriteHook,
    patterns: &'static AmdPatterns,
    seen: HashSet<String>,
    ordered: Vec<LoadedModule>,
}

impl Walk<'_> {
    fn visit(&mut self, id: &str) -> Result<(), BundleError> {
        if self.skipped(id) || !self.seen.insert(id.to_string()) {
            return Ok(());
        }

        let path = resolve_path(self.unit, id);
        if !path.is_file() {
            return Err(BundleError::ModuleNotFound {
                unit: self.unit.name.clone(),
                module: id.to_string(),
                path,
            });
        }
        let source = fs::read_to_string(&path).map_err(|e| BundleError::Read {
            unit: self.unit.name.clone(),
            path: path.clone(),
            source: e,
        })?;

        let text = self
            .hook
            .on_build_read(id, &path, &source)
            .map_err(|e| BundleError::Rewrite {
                unit: self.unit.name.clone(),
                source: e,
            })?;

        for dep in self.patterns.dependencies(&text) {
            let dep = normalize(&dep, id);
            self.visit(&dep)?;
        }

        debug!(unit = %self.unit.name, module = %id, "module added");
        self.ordered.push(LoadedModule {
            text: self.patterns.name_anonymous_define(&text, id),
            id: id.to_string(),
        });
        Ok(())
    }

    fn skipped(&self, id: &str) -> bool {
        id.contains('!')
            || LOADER_IDS.contains(&id)
            || id.starts_with("http:")
            || id.starts_with("https:")
            || id.starts_with("//")
            || self.unit.exclude.iter().any(|e| e == id)
    }
}

/// Map a module id to its file using the longest matching path alias.
pub fn resolve_path(unit: &BundleUnit, id: &str) -> PathBuf {
    let aliased = unit
        .path_aliases
        .iter()
        .filter(|(alias, _)| id == alias.as_str() || id.starts_with(&format!("{alias}/")))
        .max_by_key(|(alias, _)| alias.len())
        .map(|(alias, target)| format!("{target}{}", &id[alias.len()..]))
        .unwrap_or_else(|| id.to_string());

    let file = if aliased.ends_with(".js") {
        aliased
    } else {
        format!("{aliased}.js")
    };
    unit.base_url.join(file)
}

/// Resolve `./x` and `../x` against the requiring module's directory.
fn normalize(dep: &str, parent: &str) -> String {
    if !(dep.starts_with("./") || dep.starts_with("../")) {
        return dep.to_string();
    }

    let mut parts: Vec<&str> = parent.split('/').collect();
    parts.pop();
    for segment in dep.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Patterns over AMD module sources, compiled once per process.
struct AmdPatterns {
    require: Regex,
    define_deps: Regex,
    quoted: Regex,
    anonymous_define: Regex,
    named_define: Regex,
}

impl AmdPatterns {
    fn get() -> Result<&'static Self, regex::Error> {
        static PATTERNS: OnceLock<AmdPatterns> = OnceLock::new();
        if let Some(patterns) = PATTERNS.get() {
            return Ok(patterns);
        }
        let compiled = Self {
            require: Regex::new(r#"\brequire\s*\(\s*["']([^"']+)["']\s*\)"#)?,
            define_deps: Regex::new(
                r#"\bdefine\s*\(\s*(?:["'][^"']*["']\s*,\s*)?\[([^\]]*)\]"#,
            )?,
            quoted: Regex::new(r#"["']([^"']+)["']"#)?,
            anonymous_define: Regex::new(r#"\bdefine\s*\(\s*([^"'\s)])"#)?,
            named_define: Regex::new(r#"\bdefine\s*\(\s*["']"#)?,
        };
        Ok(PATTERNS.get_or_init(|| compiled))
    }

    fn dependencies(&self, text: &str) -> Vec<String> {
        let mut deps: Vec<String> = Vec::new();
        let mut push = |id: &str| {
            if !deps.iter().any(|d| d == id) {
                deps.push(id.to_string());
            }
        };

        if let Some(caps) = self.define_deps.captures(text) {
            for q in self.quoted.captures_iter(&caps[1]) {
                push(&q[1]);
            }
        }
        for caps in self.require.captures_iter(text) {
            push(&caps[1]);
        }
        deps
    }

    /// Give the first anonymous `define(` call an explicit module id.
    fn name_anonymous_define(&self, text: &str, id: &str) -> String {
        if self.named_define.is_match(text) {
            return text.to_string();
        }
        self.anonymous_define
            .replacen(text, 1, |caps: &Captures| format!("define(\"{id}\", {}", &caps[1]))
            .into_owned()
    }
}

/// Dependency ids referenced by a module, in source order, without duplicates.
pub fn dependencies(text: &str) -> Result<Vec<String>, regex::Error> {
    Ok(AmdPatterns::get()?.dependencies(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RewriteError;
    use crate::rewrite::{RewriteTable, Substitution};

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn unit(root: &Path) -> BundleUnit {
        BundleUnit::new("main", "main", root.join("src"), root.join("dist/main.js"))
    }

    #[test]
    fn dependencies_from_define_and_require() {
        let text = r#"define(["utils/Global", "text!x.html", "require"], function (G) {
            var A = require("./a"), B = require('b');
            var again = require("./a");
        });"#;
        assert_eq!(
            dependencies(text).unwrap(),
            ["utils/Global", "text!x.html", "require", "./a", "b"]
        );
    }

    #[test]
    fn normalize_relative_ids() {
        assert_eq!(normalize("./a", "utils/Global"), "utils/a");
        assert_eq!(normalize("../b/c", "utils/sub/x"), "utils/b/c");
        assert_eq!(normalize("./a", "main"), "a");
        assert_eq!(normalize("lib/x", "utils/Global"), "lib/x");
    }

    #[test]
    fn resolve_uses_longest_alias() {
        let mut u = unit(Path::new("/w"));
        u.path_aliases.insert("hacks".to_string(), "../hacks".to_string());
        u.path_aliases.insert("hacks.app".to_string(), "../../hacks/app".to_string());
        u.path_aliases.insert("text".to_string(), "thirdparty/text/text".to_string());

        assert_eq!(resolve_path(&u, "hacks.app"), PathBuf::from("/w/src/../../hacks/app.js"));
        assert_eq!(resolve_path(&u, "hacks/low"), PathBuf::from("/w/src/../hacks/low.js"));
        assert_eq!(resolve_path(&u, "text"), PathBuf::from("/w/src/thirdparty/text/text.js"));
        assert_eq!(resolve_path(&u, "textual"), PathBuf::from("/w/src/textual.js"));
    }

    #[test]
    fn bundles_dependencies_first_and_applies_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "src/main.js",
            "define(['utils/Global', 'brackets'], function () {});",
        );
        write(
            dir.path(),
            "src/utils/Global.js",
            "define(function () { global.brackets.app = {}; });",
        );
        write(
            dir.path(),
            "src/brackets.js",
            "define(function (require) { var G = require('./utils/Global'); });",
        );

        let shim = Substitution::literal(
            "global.brackets.app = {};",
            "global.brackets.app = require(\"hacks.app\");",
        );
        let mut table = RewriteTable::new(true);
        table.insert_substitutions("utils/Global", &[shim]).unwrap();

        let mut u = unit(dir.path());
        u.exclude.push("hacks.app".to_string());
        let out = ModuleBundler::new().bundle(&u, &table).unwrap();

        assert_eq!(out.modules, ["utils/Global", "brackets", "main"]);
        let text = fs::read_to_string(dir.path().join("dist/main.js")).unwrap();
        assert!(text.contains(concat!(
            "define(\"utils/Global\", function () { ",
            "global.brackets.app = require(\"hacks.app\"); });"
        )));
        assert!(text.find("utils/Global").unwrap() < text.find("define(\"main\"").unwrap());
        assert_eq!(out.bytes, text.len());
    }

    #[test]
    fn includes_and_source_urls() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.js", "define(function () {});\n");
        write(dir.path(), "src/mode/css/css.js", "define(function () {});\n");

        let mut u = unit(dir.path());
        u.include.push("mode/css/css".to_string());
        u.optimization.source_url = true;
        let out = ModuleBundler::new().bundle(&u, &RewriteTable::default()).unwrap();

        assert_eq!(out.modules, ["main", "mode/css/css"]);
        let text = fs::read_to_string(&out.output_file).unwrap();
        assert!(text.contains("//# sourceURL=mode/css/css.js"));
    }

    #[test]
    fn missing_module_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.js", "define(['absent'], function () {});");
        let err = ModuleBundler::new()
            .bundle(&unit(dir.path()), &RewriteTable::default())
            .unwrap_err();
        assert!(
            matches!(err, BundleError::ModuleNotFound { ref module, .. } if module == "absent")
        );
        assert!(!dir.path().join("dist/main.js").exists());
    }

    #[test]
    fn rewrite_failure_is_tagged_with_unit() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.js", "define(function () {});");
        let mut table = RewriteTable::new(true);
        table
            .insert_substitutions("main", &[Substitution::literal("gone upstream", "x")])
            .unwrap();

        let err = ModuleBundler::new().bundle(&unit(dir.path()), &table).unwrap_err();
        assert!(err.is_rewrite());
        assert!(matches!(
            err,
            BundleError::Rewrite { source: RewriteError::NoMatch { .. }, .. }
        ));
    }

    #[test]
    fn circular_dependencies_terminate() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.js", "define(['a'], function () {});");
        write(dir.path(), "src/a.js", "define(['b'], function () {});");
        write(dir.path(), "src/b.js", "define(['a'], function () {});");
        let out = ModuleBundler::new()
            .bundle(&unit(dir.path()), &RewriteTable::default())
            .unwrap();
        assert_eq!(out.modules, ["b", "a", "main"]);
    }

    #[test]
    fn minifier_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.js", "define(function () {});");
        let mut u = unit(dir.path());
        u.optimization.minify = true;
        let bundler = ModuleBundler::new().with_minifier(vec![
            "tr".to_string(),
            "-d".to_string(),
            " ".to_string(),
        ]);
        bundler.bundle(&u, &RewriteTable::default()).unwrap();
        let text = fs::read_to_string(dir.path().join("dist/main.js")).unwrap();
        assert_eq!(text, "define(\"main\",function(){});\n");
    }

    #[test]
    fn anonymous_define_is_named_once() {
        let patterns = AmdPatterns::get().unwrap();
        let named = patterns.name_anonymous_define("define(function(){ define(x); })", "m");
        assert_eq!(named, "define(\"m\", function(){ define(x); })");
        let already = patterns.name_anonymous_define("define(\"other\", [], f)", "m");
        assert_eq!(already, "define(\"other\", [], f)");
        let nested_src = "define(\"other\", function(){ define(x); })";
        assert_eq!(patterns.name_anonymous_define(nested_src, "m"), nested_src);
    }

    #[test]
    fn scanner_patterns_compile_once() {
        let first = AmdPatterns::get().unwrap();
        let second = AmdPatterns::get().unwrap();
        assert!(std::ptr::eq(first, second));
        assert_eq!(dependencies("require(\"x\")").unwrap(), ["x"]);
    }
}
