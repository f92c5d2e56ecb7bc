//! Asset copy manifest: glob-selected files copied into the deployable layout.
//!
//! Each rule lists globs relative to its source root. Entries starting with
//! `!` exclude; an excluded path is never copied no matter how many inclusion
//! globs match it. Rules run in order and overwrite silently, so the last
//! rule to write a destination path wins.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::CopyError;

/// A glob that failed to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobError {
    pub pattern: String,
    pub reason: String,
}

/// Inclusion/exclusion glob pair evaluated against `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl PathFilter {
    /// Compile `globs`; `!`-prefixed entries exclude. No inclusion globs means
    /// every path is included.
    pub fn new(globs: &[String]) -> Result<Self, GlobError> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        let mut has_include = false;

        for raw in globs {
            let (builder, pattern) = match raw.strip_prefix('!') {
                Some(p) => (&mut exclude, p),
                None => {
                    has_include = true;
                    (&mut include, raw.as_str())
                }
            };
            let glob = GlobBuilder::new(pattern)
                .literal_separator(true)
                .build()
                .map_err(|e| GlobError {
                    pattern: raw.clone(),
                    reason: e.to_string(),
                })?;
            builder.add(glob);
        }

        let build = |b: GlobSetBuilder| {
            b.build().map_err(|e| GlobError {
                pattern: globs.join(", "),
                reason: e.to_string(),
            })
        };

        Ok(Self {
            include: if has_include { Some(build(include)?) } else { None },
            exclude: build(exclude)?,
        })
    }

    pub fn matches(&self, relative: &Path) -> bool {
        if self.exclude.is_match(relative) {
            return false;
        }
        self.include
            .as_ref()
            .map(|set| set.is_match(relative))
            .unwrap_or(true)
    }

    /// Files under `root` accepted by this filter, as sorted relative paths.
    pub fn select(&self, root: &Path) -> Result<Vec<PathBuf>, (PathBuf, std::io::Error)> {
        let mut selected = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                (path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = to_slash(relative);
            if self.matches(&relative) {
                selected.push(relative);
            }
        }
        Ok(selected)
    }
}

fn to_slash(path: &Path) -> PathBuf {
    PathBuf::from(path.to_string_lossy().replace('\\', "/"))
}

/// One copy rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CopyRule {
    pub source_root: PathBuf,
    pub destination_root: PathBuf,

    /// Ordered globs; `!` prefix excludes.
    #[serde(default)]
    pub globs: Vec<String>,

    /// Relative source path -> relative destination path overrides.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
}

impl CopyRule {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            globs: Vec::new(),
            rename: BTreeMap::new(),
        }
    }

    pub fn glob(mut self, pattern: impl Into<String>) -> Self {
        self.globs.push(pattern.into());
        self
    }

    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rename.insert(from.into(), to.into());
        self
    }
}

/// Per-rule copy counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleCount {
    pub rule: usize,
    pub files: usize,
    pub bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyReport {
    pub rules: Vec<RuleCount>,
}

impl CopyReport {
    pub fn total_files(&self) -> usize {
        self.rules.iter().map(|r| r.files).sum()
    }
}

/// Execute `rules` in order.
pub fn copy(rules: &[CopyRule]) -> Result<CopyReport, CopyError> {
    let mut report = CopyReport::default();

    for (index, rule) in rules.iter().enumerate() {
        if !rule.source_root.is_dir() {
            return Err(CopyError::MissingSourceRoot {
                rule: index,
                root: rule.source_root.clone(),
            });
        }

        let filter = PathFilter::new(&rule.globs).map_err(|e| CopyError::InvalidGlob {
            rule: index,
            pattern: e.pattern,
            reason: e.reason,
        })?;
        let files = filter
            .select(&rule.source_root)
            .map_err(|(path, source)| CopyError::Io {
                rule: index,
                path,
                source,
            })?;

        let mut count = RuleCount {
            rule: index,
            ..Default::default()
        };
        for relative in files {
            let key = relative.to_string_lossy();
            let target = match rule.rename.get(key.as_ref()) {
                Some(renamed) => rule.destination_root.join(renamed),
                None => rule.destination_root.join(&relative),
            };
            let source = rule.source_root.join(&relative);
            if same_file(&source, &target) {
                debug!(path = %source.display(), "source is its own destination, skipped");
                continue;
            }
            count.bytes += copy_file(&source, &target).map_err(|e| CopyError::Io {
                rule: index,
                path: source.clone(),
                source: e,
            })?;
            count.files += 1;
            debug!(from = %source.display(), to = %target.display(), "copied");
        }

        info!(
            rule = index,
            files = count.files,
            root = %rule.source_root.display(),
            "copy rule done"
        );
        report.rules.push(count);
    }

    Ok(report)
}

/// Copying a file onto itself truncates it.
fn same_file(source: &Path, target: &Path) -> bool {
    match (source.canonicalize(), target.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn copy_file(source: &Path, target: &Path) -> std::io::Result<u64> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn globs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exclusion_beats_inclusion() {
        let f = PathFilter::new(&globs(&["**/*.js", "!vendor/**"])).unwrap();
        assert!(f.matches(Path::new("a.js")));
        assert!(f.matches(Path::new("lib/c.js")));
        assert!(!f.matches(Path::new("vendor/b.js")));
        assert!(!f.matches(Path::new("a.css")));
    }

    #[test]
    fn star_does_not_cross_directories() {
        let f = PathFilter::new(&globs(&["**", "!*/main.js"])).unwrap();
        assert!(!f.matches(Path::new("ext/main.js")));
        assert!(f.matches(Path::new("ext/lib/main.js")));
        assert!(f.matches(Path::new("ext/style.css")));
    }

    #[test]
    fn no_inclusions_means_everything() {
        let f = PathFilter::new(&globs(&["!*.map"])).unwrap();
        assert!(f.matches(Path::new("a/b/c.js")));
        assert!(!f.matches(Path::new("x.map")));
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let err = PathFilter::new(&globs(&["a/[bad"])).unwrap_err();
        assert_eq!(err.pattern, "a/[bad");
    }

    #[test]
    fn copies_only_included_files() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(src.path(), "a.js", "a");
        write(src.path(), "vendor/b.js", "b");

        let report = copy(&[CopyRule::new(src.path(), dst.path())
            .glob("**/*.js")
            .glob("!vendor/**")])
        .unwrap();

        assert!(dst.path().join("a.js").exists());
        assert!(!dst.path().join("vendor/b.js").exists());
        assert_eq!(report.total_files(), 1);
        assert_eq!(report.rules[0].bytes, 1);
    }

    #[test]
    fn missing_source_root_is_an_error() {
        let dst = tempfile::tempdir().unwrap();
        let err = copy(&[
            CopyRule::new(dst.path(), dst.path().join("out")),
            CopyRule::new(dst.path().join("absent"), dst.path()),
        ])
        .unwrap_err();
        assert!(matches!(err, CopyError::MissingSourceRoot { rule: 1, .. }));
    }

    #[test]
    fn rename_and_last_rule_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(first.path(), ".index.html", "<html>selected</html>");
        write(first.path(), "index.html", "<html>raw</html>");
        write(second.path(), "index.html", "<html>second</html>");

        let report = copy(&[
            CopyRule::new(first.path(), dst.path())
                .glob(".index.html")
                .rename(".index.html", "index.html"),
            CopyRule::new(second.path(), dst.path()).glob("index.html"),
        ])
        .unwrap();

        assert_eq!(
            fs::read_to_string(dst.path().join("index.html")).unwrap(),
            "<html>second</html>"
        );
        assert!(!dst.path().join(".index.html").exists());
        assert_eq!(report.rules.len(), 2);
    }

    #[test]
    fn select_is_sorted() {
        let src = tempfile::tempdir().unwrap();
        for name in ["c.js", "a.js", "b/z.js"] {
            write(src.path(), name, "");
        }
        let f = PathFilter::new(&globs(&["**/*.js"])).unwrap();
        let picked = f.select(src.path()).unwrap();
        assert_eq!(
            picked,
            [PathBuf::from("a.js"), PathBuf::from("b/z.js"), PathBuf::from("c.js")]
        );
    }

    #[test]
    fn copy_onto_itself_keeps_contents() {
        let src = tempfile::tempdir().unwrap();
        write(src.path(), "a.js", "var a = 1;");
        write(src.path(), "b/c.js", "var c = 2;");

        let report = copy(&[CopyRule::new(src.path(), src.path()).glob("**/*.js")]).unwrap();

        assert_eq!(report.total_files(), 0);
        assert_eq!(fs::read_to_string(src.path().join("a.js")).unwrap(), "var a = 1;");
        assert_eq!(fs::read_to_string(src.path().join("b/c.js")).unwrap(), "var c = 2;");
    }
}
