//! HTML entry page processing: target selection, placeholders and build blocks.
//!
//! Conditional sections look like
//! `<!--(if target dist)> ... <!--(endif)-->` and build blocks like
//! `<!-- build:js main.js --> <script src="a.js"></script> <!-- endbuild -->`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TemplateError;

const IF_OPEN: &str = "<!--(if target ";
const IF_CLOSE: &str = "<!--(endif)-->";
const BUILD_OPEN: &str = "<!-- build:";
const BUILD_CLOSE: &str = "<!-- endbuild -->";

/// Which template to render for which target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateSpec {
    pub source: PathBuf,
    pub output: PathBuf,
    pub target: String,
}

/// A literal replacement inside one file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Placeholder {
    pub file: PathBuf,
    pub find: String,
    #[serde(default)]
    pub replace: String,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TemplateError + '_ {
    move |source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn line_of(text: &str, offset: usize) -> usize {
    text[..offset].matches('\n').count() + 1
}

/// Keep only conditional sections whose target list contains `target`.
///
/// Targets in one condition are separated by `||`.
pub fn select_target(text: &str, target: &str, path: &Path) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = 0;

    while let Some(found) = text[rest..].find(IF_OPEN) {
        let open = rest + found;
        out.push_str(&text[rest..open]);

        let cond_start = open + IF_OPEN.len();
        let cond_end = text[cond_start..]
            .find(")>")
            .map(|i| cond_start + i)
            .ok_or_else(|| TemplateError::Syntax {
                path: path.to_path_buf(),
                line: line_of(text, open),
                message: "conditional without closing `)>`".to_string(),
            })?;
        let body_start = cond_end + 2;
        let body_end = text[body_start..]
            .find(IF_CLOSE)
            .map(|i| body_start + i)
            .ok_or_else(|| TemplateError::Unterminated {
                path: path.to_path_buf(),
                line: line_of(text, open),
                kind: "if target",
            })?;

        let body = &text[body_start..body_end];
        if body.contains(IF_OPEN) {
            return Err(TemplateError::Syntax {
                path: path.to_path_buf(),
                line: line_of(text, open),
                message: "nested conditionals are not supported".to_string(),
            });
        }

        let matches = text[cond_start..cond_end]
            .split("||")
            .any(|t| t.trim() == target);
        if matches {
            out.push_str(body);
        }
        rest = body_end + IF_CLOSE.len();
    }

    out.push_str(&text[rest..]);
    Ok(out)
}

/// Render `spec.source` for `spec.target` into `spec.output`.
pub fn render_template(spec: &TemplateSpec) -> Result<(), TemplateError> {
    let text = fs::read_to_string(&spec.source).map_err(io_err(&spec.source))?;
    let rendered = select_target(&text, &spec.target, &spec.source)?;
    if let Some(parent) = spec.output.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    fs::write(&spec.output, rendered).map_err(io_err(&spec.output))?;
    debug!(output = %spec.output.display(), target = %spec.target, "template selected");
    Ok(())
}

/// Apply placeholders in order; each must be present in its file.
pub fn apply_placeholders(placeholders: &[Placeholder]) -> Result<usize, TemplateError> {
    for (index, p) in placeholders.iter().enumerate() {
        let text = fs::read_to_string(&p.file).map_err(io_err(&p.file))?;
        if !text.contains(&p.find) {
            return Err(TemplateError::PlaceholderMissing {
                index,
                path: p.file.clone(),
                find: p.find.clone(),
            });
        }
        fs::write(&p.file, text.replace(&p.find, &p.replace)).map_err(io_err(&p.file))?;
    }
    Ok(placeholders.len())
}

/// Asset type of a build block.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Js,
    Css,
}

impl AssetKind {
    fn separator(self) -> &'static str {
        match self {
            AssetKind::Js => "\n;\n",
            AssetKind::Css => "\n",
        }
    }

    fn reference(self, output: &str) -> String {
        match self {
            AssetKind::Js => format!("<script src=\"{output}\"></script>"),
            AssetKind::Css => format!("<link rel=\"stylesheet\" href=\"{output}\">"),
        }
    }
}

/// One `build:` block: the files it lists and the file they concatenate into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcatPlan {
    pub kind: AssetKind,
    /// Output path relative to the page.
    pub output: String,
    /// Source paths relative to the page, in listed order.
    pub sources: Vec<String>,
}

impl ConcatPlan {
    /// Concatenate sources from `source_root` into `dest_root/output`.
    ///
    /// Returns `false` without writing when the output already exists, which
    /// happens when the bundler produced it.
    pub fn execute(&self, source_root: &Path, dest_root: &Path) -> Result<bool, TemplateError> {
        let target = dest_root.join(&self.output);
        if target.exists() {
            return Ok(false);
        }

        let mut parts = Vec::with_capacity(self.sources.len());
        for src in &self.sources {
            let path = source_root.join(src);
            parts.push(fs::read_to_string(&path).map_err(io_err(&path))?);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        fs::write(&target, parts.join(self.kind.separator())).map_err(io_err(&target))?;
        Ok(true)
    }
}

struct BlockSpan {
    plan: ConcatPlan,
    start: usize,
    end: usize,
}

/// `src`/`href` attribute values, compiled once per process.
fn src_re(path: &Path) -> Result<&'static Regex, TemplateError> {
    static RE: OnceLock<Regex> = OnceLock::new();
    if let Some(re) = RE.get() {
        return Ok(re);
    }
    let compiled = Regex::new(r#"(?:src|href)\s*=\s*["']([^"'?#]+)[^"']*["']"#).map_err(|e| {
        TemplateError::Syntax {
            path: path.to_path_buf(),
            line: 0,
            message: format!("reference pattern failed to compile: {e}"),
        }
    })?;
    Ok(RE.get_or_init(|| compiled))
}

fn blocks(text: &str, path: &Path) -> Result<Vec<BlockSpan>, TemplateError> {
    let mut spans = Vec::new();
    let mut rest = 0;

    while let Some(found) = text[rest..].find(BUILD_OPEN) {
        let start = rest + found;
        let line = line_of(text, start);
        let header_end = text[start..]
            .find("-->")
            .map(|i| start + i)
            .ok_or_else(|| TemplateError::Unterminated {
                path: path.to_path_buf(),
                line,
                kind: "build header",
            })?;
        let header = text[start + BUILD_OPEN.len()..header_end].trim();
        let (kind, output) = header.split_once(char::is_whitespace).ok_or_else(|| {
            TemplateError::Syntax {
                path: path.to_path_buf(),
                line,
                message: format!("build block without output: {header:?}"),
            }
        })?;
        let kind = match kind {
            "js" => AssetKind::Js,
            "css" => AssetKind::Css,
            other => {
                return Err(TemplateError::Syntax {
                    path: path.to_path_buf(),
                    line,
                    message: format!("unknown build block type {other:?}"),
                })
            }
        };

        let body_start = header_end + 3;
        let body_end = text[body_start..]
            .find(BUILD_CLOSE)
            .map(|i| body_start + i)
            .ok_or_else(|| TemplateError::Unterminated {
                path: path.to_path_buf(),
                line,
                kind: "build",
            })?;

        let sources = src_re(path)?
            .captures_iter(&text[body_start..body_end])
            .map(|c| c[1].trim_start_matches('/').to_string())
            .collect();

        let end = body_end + BUILD_CLOSE.len();
        spans.push(BlockSpan {
            plan: ConcatPlan {
                kind,
                output: output.trim().trim_start_matches('/').to_string(),
                sources,
            },
            start,
            end,
        });
        rest = end;
    }

    Ok(spans)
}

/// Parse every build block in a page.
pub fn parse_build_blocks(text: &str, path: &Path) -> Result<Vec<ConcatPlan>, TemplateError> {
    Ok(blocks(text, path)?.into_iter().map(|b| b.plan).collect())
}

/// Replace every build block with a single reference to its output.
pub fn rewrite_references(text: &str, path: &Path) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = 0;
    for block in blocks(text, path)? {
        out.push_str(&text[rest..block.start]);
        out.push_str(&block.plan.kind.reference(&block.plan.output));
        rest = block.end;
    }
    out.push_str(&text[rest..]);
    Ok(out)
}
