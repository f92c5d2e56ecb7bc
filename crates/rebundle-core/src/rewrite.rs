//! Module rewrite table: per-module source edits applied while bundling.
//!
//! Rules are keyed by logical module id (`utils/Global`, `brackets`), never by
//! file path. A module has either an ordered list of substitutions or a full
//! source transform; when a configuration declares both, the full transform
//! wins. Rewriting is a pure function of `(module, path, source)`: replacement
//! files are read once when the table is built.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RewriteError;
use crate::obs;

/// One match/replace edit as written in configuration.
///
/// Replaces the first occurrence unless `all` is set. With `regex = true`,
/// `find` is a regular expression and `replace` may reference groups as `$1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Substitution {
    pub find: String,
    #[serde(default)]
    pub replace: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub all: bool,
}

impl Substitution {
    pub fn literal(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
            regex: false,
            all: false,
        }
    }

    pub fn pattern(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            regex: true,
            ..Self::literal(find, replace)
        }
    }

    pub fn everywhere(mut self) -> Self {
        self.all = true;
        self
    }
}

/// Configuration entry for one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RewriteSpec {
    #[serde(default)]
    pub substitutions: Vec<Substitution>,

    /// File whose contents replace the module source entirely.
    #[serde(default)]
    pub replace_with: Option<PathBuf>,

    /// Substitutions applied to the `replace_with` contents.
    #[serde(default)]
    pub post: Vec<Substitution>,
}

#[derive(Debug, Clone)]
enum Matcher {
    Literal(String),
    Pattern(Regex),
}

/// A validated substitution ready to run.
#[derive(Debug, Clone)]
pub struct CompiledSubstitution {
    matcher: Matcher,
    replace: String,
    all: bool,
}

impl CompiledSubstitution {
    pub fn compile(module: &str, index: usize, sub: &Substitution) -> Result<Self, RewriteError> {
        if sub.find.is_empty() {
            return Err(RewriteError::EmptyMatch {
                module: module.to_string(),
                index,
            });
        }

        let matcher = if sub.regex {
            let re = Regex::new(&sub.find).map_err(|e| RewriteError::InvalidPattern {
                module: module.to_string(),
                index,
                reason: e.to_string(),
            })?;
            Matcher::Pattern(re)
        } else {
            Matcher::Literal(sub.find.clone())
        };

        Ok(Self {
            matcher,
            replace: sub.replace.clone(),
            all: sub.all,
        })
    }

    fn find_text(&self) -> &str {
        match &self.matcher {
            Matcher::Literal(s) => s,
            Matcher::Pattern(re) => re.as_str(),
        }
    }

    /// Apply to `text`, or `None` when nothing matched.
    fn apply(&self, text: &str) -> Option<String> {
        match &self.matcher {
            Matcher::Literal(find) => {
                if !text.contains(find.as_str()) {
                    return None;
                }
                Some(if self.all {
                    text.replace(find.as_str(), &self.replace)
                } else {
                    text.replacen(find.as_str(), &self.replace, 1)
                })
            }
            Matcher::Pattern(re) => {
                if !re.is_match(text) {
                    return None;
                }
                Some(if self.all {
                    re.replace_all(text, self.replace.as_str()).into_owned()
                } else {
                    re.replace(text, self.replace.as_str()).into_owned()
                })
            }
        }
    }
}

/// Code-defined full-source transform: `(module, path, original) -> replacement`.
pub type TransformFn =
    Arc<dyn Fn(&str, &Path, &str) -> Result<String, RewriteError> + Send + Sync>;

/// Rewrite applied to one module.
#[derive(Clone)]
pub enum RewriteRule {
    /// Ordered edits, each applied to the result of the previous one.
    Substitutions(Vec<CompiledSubstitution>),

    /// The module is replaced by preloaded text, then `post` edits run on it.
    Replace {
        source: PathBuf,
        text: String,
        post: Vec<CompiledSubstitution>,
    },

    /// Arbitrary transform over the original source text.
    Transform(TransformFn),
}

impl RewriteRule {
    pub fn kind(&self) -> &'static str {
        match self {
            RewriteRule::Substitutions(_) => "substitutions",
            RewriteRule::Replace { .. } => "replace",
            RewriteRule::Transform(_) => "transform",
        }
    }
}

impl fmt::Debug for RewriteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteRule::Substitutions(subs) => {
                f.debug_tuple("Substitutions").field(&subs.len()).finish()
            }
            RewriteRule::Replace { source, post, .. } => f
                .debug_struct("Replace")
                .field("source", source)
                .field("post", &post.len())
                .finish(),
            RewriteRule::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// Hook the bundler calls for every module it reads.
pub trait RewriteHook: Send + Sync {
    fn on_build_read(&self, module: &str, path: &Path, source: &str)
        -> Result<String, RewriteError>;
}

/// Ordered mapping from module id to its rewrite.
#[derive(Debug, Clone)]
pub struct RewriteTable {
    rules: BTreeMap<String, RewriteRule>,
    strict: bool,
}

impl Default for RewriteTable {
    fn default() -> Self {
        Self::new(true)
    }
}

impl RewriteTable {
    /// Empty table. In `strict` mode a substitution that matches nothing fails.
    pub fn new(strict: bool) -> Self {
        Self {
            rules: BTreeMap::new(),
            strict,
        }
    }

    /// Compile configuration entries, reading replacement files relative to `base_dir`.
    pub fn from_specs(
        specs: &BTreeMap<String, RewriteSpec>,
        base_dir: &Path,
        strict: bool,
    ) -> Result<Self, RewriteError> {
        let mut table = Self::new(strict);

        for (module, spec) in specs {
            let rule = match &spec.replace_with {
                Some(file) => {
                    if !spec.substitutions.is_empty() {
                        warn!(
                            module = %module,
                            "module has both replace_with and substitutions; replace_with wins"
                        );
                    }
                    let source = base_dir.join(file);
                    let text = std::fs::read_to_string(&source).map_err(|e| {
                        RewriteError::ShimUnreadable {
                            module: module.clone(),
                            path: source.clone(),
                            source: e,
                        }
                    })?;
                    RewriteRule::Replace {
                        source,
                        text,
                        post: compile_all(module, &spec.post)?,
                    }
                }
                None => RewriteRule::Substitutions(compile_all(module, &spec.substitutions)?),
            };
            table.rules.insert(module.clone(), rule);
        }

        Ok(table)
    }

    pub fn insert(&mut self, module: impl Into<String>, rule: RewriteRule) {
        self.rules.insert(module.into(), rule);
    }

    /// Add substitutions for a module, compiling them first.
    pub fn insert_substitutions(
        &mut self,
        module: &str,
        subs: &[Substitution],
    ) -> Result<(), RewriteError> {
        let compiled = compile_all(module, subs)?;
        self.rules
            .insert(module.to_string(), RewriteRule::Substitutions(compiled));
        Ok(())
    }

    pub fn get(&self, module: &str) -> Option<&RewriteRule> {
        self.rules.get(module)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewrite one module's source. Modules without a rule pass through unchanged.
    pub fn rewrite(&self, module: &str, path: &Path, source: &str) -> Result<String, RewriteError> {
        let Some(rule) = self.rules.get(module) else {
            return Ok(source.to_string());
        };

        let out = match rule {
            RewriteRule::Substitutions(subs) => self.fold(module, subs, source.to_string())?,
            RewriteRule::Replace { text, post, .. } => self.fold(module, post, text.clone())?,
            RewriteRule::Transform(f) => f(module, path, source)?,
        };
        obs::emit_rewrite_applied(module, rule.kind());
        Ok(out)
    }

    fn fold(
        &self,
        module: &str,
        subs: &[CompiledSubstitution],
        mut text: String,
    ) -> Result<String, RewriteError> {
        for (index, sub) in subs.iter().enumerate() {
            match sub.apply(&text) {
                Some(next) => text = next,
                None if self.strict => {
                    return Err(RewriteError::NoMatch {
                        module: module.to_string(),
                        index,
                        find: sub.find_text().to_string(),
                    })
                }
                None => {
                    warn!(module = %module, index, "substitution matched nothing");
                }
            }
        }
        Ok(text)
    }
}

impl RewriteHook for RewriteTable {
    fn on_build_read(
        &self,
        module: &str,
        path: &Path,
        source: &str,
    ) -> Result<String, RewriteError> {
        self.rewrite(module, path, source)
    }
}

fn compile_all(
    module: &str,
    subs: &[Substitution],
) -> Result<Vec<CompiledSubstitution>, RewriteError> {
    subs.iter()
        .enumerate()
        .map(|(i, s)| CompiledSubstitution::compile(module, i, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(module: &str, subs: &[Substitution]) -> RewriteTable {
        let mut t = RewriteTable::new(true);
        t.insert_substitutions(module, subs).unwrap();
        t
    }

    #[test]
    fn unknown_module_is_identity() {
        let t = table("X", &[Substitution::literal("foo", "bar")]);
        let out = t.rewrite("Y", Path::new("y.js"), "foo foo").unwrap();
        assert_eq!(out, "foo foo");
    }

    #[test]
    fn literal_replaces_first_occurrence_only() {
        let t = table("X", &[Substitution::literal("foo", "bar")]);
        let out = t.rewrite("X", Path::new("x.js"), "foo foo").unwrap();
        assert_eq!(out, "bar foo");
    }

    #[test]
    fn literal_all_replaces_every_occurrence() {
        let t = table("X", &[Substitution::literal("foo", "bar").everywhere()]);
        let out = t.rewrite("X", Path::new("x.js"), "foo foo").unwrap();
        assert_eq!(out, "bar bar");
    }

    #[test]
    fn pattern_first_and_all() {
        let first = table("X", &[Substitution::pattern(r"brackets\.getModule", "require")]);
        let src = "brackets.getModule(a); brackets.getModule(b);";
        assert_eq!(
            first.rewrite("X", Path::new("x.js"), src).unwrap(),
            "require(a); brackets.getModule(b);"
        );

        let all = table(
            "X",
            &[Substitution::pattern(r"brackets\.getModule", "require").everywhere()],
        );
        assert_eq!(
            all.rewrite("X", Path::new("x.js"), src).unwrap(),
            "require(a); require(b);"
        );
    }

    #[test]
    fn pattern_spans_whitespace() {
        let t = table(
            "brackets",
            &[Substitution::pattern(
                r"// Let the user know\s+if \(brackets\.inBrowser\) \{",
                "if (false) {",
            )],
        );
        let src = "// Let the user know\n    if (brackets.inBrowser) {\n  warn();\n}";
        assert_eq!(
            t.rewrite("brackets", Path::new("brackets.js"), src).unwrap(),
            "if (false) {\n  warn();\n}"
        );
    }

    #[test]
    fn substitutions_fold_left_to_right() {
        let t = table(
            "X",
            &[
                Substitution::literal("a", "b"),
                Substitution::literal("b", "c"),
            ],
        );
        // The second rule sees the first rule's output.
        assert_eq!(t.rewrite("X", Path::new("x.js"), "a").unwrap(), "c");
    }

    #[test]
    fn disjoint_rules_commute() {
        let rules = [
            Substitution::literal("alpha", "A"),
            Substitution::literal("omega", "Z"),
        ];
        let forward = table("X", &rules);
        let reversed = table("X", &[rules[1].clone(), rules[0].clone()]);
        let src = "alpha and omega";
        assert_eq!(
            forward.rewrite("X", Path::new("x.js"), src).unwrap(),
            reversed.rewrite("X", Path::new("x.js"), src).unwrap()
        );
    }

    #[test]
    fn strict_table_rejects_unmatched_substitution() {
        let t = table("X", &[Substitution::literal("missing", "y")]);
        let err = t.rewrite("X", Path::new("x.js"), "source").unwrap_err();
        assert!(matches!(err, RewriteError::NoMatch { index: 0, .. }));
    }

    #[test]
    fn lenient_table_skips_unmatched_substitution() {
        let mut t = RewriteTable::new(false);
        t.insert_substitutions(
            "X",
            &[
                Substitution::literal("missing", "y"),
                Substitution::literal("source", "text"),
            ],
        )
        .unwrap();
        assert_eq!(t.rewrite("X", Path::new("x.js"), "source").unwrap(), "text");
    }

    #[test]
    fn invalid_pattern_and_empty_match_fail_at_compile() {
        let mut t = RewriteTable::new(true);
        let err = t
            .insert_substitutions("X", &[Substitution::pattern("(unclosed", "")])
            .unwrap_err();
        assert!(matches!(err, RewriteError::InvalidPattern { .. }));

        let err = t
            .insert_substitutions("X", &[Substitution::literal("", "y")])
            .unwrap_err();
        assert!(matches!(err, RewriteError::EmptyMatch { .. }));
    }

    #[test]
    fn transform_receives_original_text() {
        let mut t = RewriteTable::new(true);
        t.insert(
            "fileSystemImpl",
            RewriteRule::Transform(Arc::new(|module, path, src| {
                Ok(format!("{module}|{}|{}", path.display(), src.len()))
            })),
        );
        let out = t
            .rewrite("fileSystemImpl", Path::new("fs.js"), "abcd")
            .unwrap();
        assert_eq!(out, "fileSystemImpl|fs.js|4");
    }

    #[test]
    fn replace_with_wins_over_substitutions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("shim.js"),
            "define(function(){ brackets.getModule('x'); // init(\"/b\");\n});",
        )
        .unwrap();

        let mut specs = BTreeMap::new();
        specs.insert(
            "utils/NodeConnection".to_string(),
            RewriteSpec {
                substitutions: vec![Substitution::literal("never", "used")],
                replace_with: Some(PathBuf::from("shim.js")),
                post: vec![
                    Substitution::literal("brackets.getModule", "require").everywhere(),
                    Substitution::literal("// init(\"/b\");", "init(\"/b\");"),
                ],
            },
        );

        let t = RewriteTable::from_specs(&specs, dir.path(), true).unwrap();
        let out = t
            .rewrite("utils/NodeConnection", Path::new("nc.js"), "original")
            .unwrap();
        assert_eq!(out, "define(function(){ require('x'); init(\"/b\");\n});");
    }

    #[test]
    fn missing_shim_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut specs = BTreeMap::new();
        specs.insert(
            "X".to_string(),
            RewriteSpec {
                replace_with: Some(PathBuf::from("absent.js")),
                ..Default::default()
            },
        );
        let err = RewriteTable::from_specs(&specs, dir.path(), true).unwrap_err();
        assert!(matches!(err, RewriteError::ShimUnreadable { .. }));
    }

    #[test]
    fn rewrite_is_deterministic() {
        let t = table("X", &[Substitution::literal("global.brackets.app = {};", "shim();")]);
        let src = "global.brackets.app = {}; rest";
        let a = t.rewrite("X", Path::new("x.js"), src).unwrap();
        let b = t.rewrite("X", Path::new("x.js"), src).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, "shim(); rest");
    }
}
