//! Built-in build stage implementations.
//!
//! Every stage reads its inputs from the configuration and from what earlier
//! stages left on disk or in the [`BuildContext`]. Stages with nothing
//! configured succeed with a `skipped` summary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rebundle_core::error::TemplateError;
use rebundle_core::metadata::{self, BuildStamp};
use rebundle_core::{
    compress, copy, discover_units, html, tool, BuildConfig, BuildError, BundleGraph, Bundler,
    ConfigError, ModuleBundler, PathFilter, RewriteErrorPolicy,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::context::BuildContext;
use crate::runner::ToolRunner;
use crate::stage::{BuiltinStage, Stage};

#[async_trait]
impl Stage for BuiltinStage {
    fn name(&self) -> &str {
        BuiltinStage::name(self)
    }

    fn dependencies(&self) -> Vec<String> {
        self.requires().iter().map(|s| s.name().to_string()).collect()
    }

    async fn run(&self, ctx: &mut BuildContext) -> Result<Value, BuildError> {
        match self {
            BuiltinStage::Clean => clean(&ctx.config),
            BuiltinStage::Patch => patch(ctx),
            BuiltinStage::Style => style(&ctx.config).await,
            BuiltinStage::Template => template(&ctx.config),
            BuiltinStage::Placeholders => placeholders(&ctx.config),
            BuiltinStage::BundlePrepare => bundle_prepare(ctx),
            BuiltinStage::HtmlMinify => html_minify(&ctx.config),
            BuiltinStage::Bundle => bundle(ctx),
            BuiltinStage::Concat => concat(ctx),
            BuiltinStage::Copy => copy_assets(ctx),
            BuiltinStage::RewriteReferences => rewrite_references(&ctx.config),
            BuiltinStage::Compress => compress_outputs(ctx),
            BuiltinStage::Metadata => stamp_metadata(ctx),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> BuildError + '_ {
    move |source| BuildError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn skipped(reason: &str) -> Value {
    json!({ "skipped": reason })
}

fn filter(section: &str, globs: &[String]) -> Result<PathFilter, BuildError> {
    PathFilter::new(globs).map_err(|e| {
        ConfigError::Invalid(format!("{section}: bad glob {:?}: {}", e.pattern, e.reason)).into()
    })
}

fn select(filter: &PathFilter, root: &Path) -> Result<Vec<PathBuf>, BuildError> {
    filter
        .select(root)
        .map_err(|(path, source)| BuildError::Io { path, source })
}

fn clean(config: &BuildConfig) -> Result<Value, BuildError> {
    let mut removed = Vec::new();
    for path in &config.clean {
        let Ok(meta) = fs::symlink_metadata(path) else {
            continue;
        };
        let result = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        result.map_err(io_error(path))?;
        debug!(path = %path.display(), "removed");
        removed.push(path.display().to_string());
    }
    Ok(json!({ "removed": removed }))
}

fn patch(ctx: &mut BuildContext) -> Result<Value, BuildError> {
    let registry = ctx.config.patch_registry();
    if registry.is_empty() {
        return Ok(skipped("no patch sets"));
    }
    let reports = registry.apply_all()?;
    let applied: usize = reports.iter().map(|r| r.applied).sum();
    let summary = json!({ "sets": reports.len(), "patches": applied });
    ctx.patches = reports;
    Ok(summary)
}

async fn style(config: &BuildConfig) -> Result<Value, BuildError> {
    let Some(command) = &config.tools.style else {
        return Ok(skipped("no style compiler"));
    };
    let result =
        ToolRunner::execute("style", command, &config.root, config.tools.timeout_secs).await?;
    result.check()?;
    Ok(json!({ "duration_ms": result.duration_ms }))
}

fn template(config: &BuildConfig) -> Result<Value, BuildError> {
    let Some(spec) = &config.template else {
        return Ok(skipped("no template"));
    };
    html::render_template(spec)?;
    Ok(json!({ "output": spec.output, "target": spec.target }))
}

fn placeholders(config: &BuildConfig) -> Result<Value, BuildError> {
    let applied = html::apply_placeholders(&config.placeholders)?;
    Ok(json!({ "applied": applied }))
}

fn bundle_prepare(ctx: &mut BuildContext) -> Result<Value, BuildError> {
    ctx.concat_plans.clear();
    let config = Arc::clone(&ctx.config);
    let Some(page) = config.prepare_page() else {
        return Ok(skipped("no page to prepare"));
    };
    let text = fs::read_to_string(page).map_err(|source| TemplateError::Io {
        path: page.to_path_buf(),
        source,
    })?;
    ctx.concat_plans = html::parse_build_blocks(&text, page)?;
    let outputs: Vec<&str> = ctx.concat_plans.iter().map(|p| p.output.as_str()).collect();
    Ok(json!({ "blocks": outputs }))
}

fn html_minify(config: &BuildConfig) -> Result<Value, BuildError> {
    let source_dir = &config.paths.source;
    if !source_dir.is_dir() {
        return Ok(skipped("no source dir"));
    }
    let pages = select(&filter("[html] minify", &config.html.minify)?, source_dir)?;

    for relative in &pages {
        let from = source_dir.join(relative);
        let to = config.paths.dist.join(relative);
        let text = fs::read(&from).map_err(io_error(&from))?;
        let out = match &config.tools.html_minify {
            Some(command) => tool::run_filter("html minifier", command, &text)?,
            None => text,
        };
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&to, out).map_err(io_error(&to))?;
    }
    Ok(json!({ "pages": pages.len(), "minified": config.tools.html_minify.is_some() }))
}

/// Discover units and validate the bundle graph without writing anything.
pub fn build_graph(config: &BuildConfig) -> Result<Option<BundleGraph>, BuildError> {
    let Some(bundle) = &config.bundle else {
        return Ok(None);
    };
    let rewrites = Arc::new(config.rewrite_table()?);
    let mut root = bundle.root.clone();
    let discovered = discover_units(
        &mut root,
        &config.discovery,
        &config.paths.dist,
        &bundle.extensions,
    )?;
    Ok(Some(BundleGraph::build(root, discovered, rewrites)?))
}

fn bundle(ctx: &mut BuildContext) -> Result<Value, BuildError> {
    ctx.bundles.clear();
    ctx.skipped_units.clear();
    let config = Arc::clone(&ctx.config);
    let Some(graph) = build_graph(&config)? else {
        return Ok(skipped("no bundle configured"));
    };

    let bundler = match &config.tools.js_minify {
        Some(command) => ModuleBundler::new().with_minifier(command.clone()),
        None => ModuleBundler::new(),
    };

    for unit in graph.units() {
        match bundler.bundle(unit, graph.rewrites()) {
            Ok(output) => ctx.bundles.push(output),
            Err(e) if e.is_rewrite()
                && config.policy.on_rewrite_error == RewriteErrorPolicy::SkipUnit =>
            {
                warn!(unit = %unit.name, error = %e, "rewrite failed; unit skipped");
                ctx.skipped_units.push(unit.name.clone());
            }
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        units = ctx.bundles.len(),
        skipped = ctx.skipped_units.len(),
        "bundling done"
    );
    let summary = json!({
        "units": ctx.bundles.iter().map(|b| &b.unit).collect::<Vec<_>>(),
        "modules": ctx.bundles.iter().map(|b| b.modules.len()).sum::<usize>(),
        "skipped": ctx.skipped_units,
    });
    ctx.graph = Some(graph);
    Ok(summary)
}

fn concat(ctx: &mut BuildContext) -> Result<Value, BuildError> {
    let config = Arc::clone(&ctx.config);
    let Some(page) = config.prepare_page() else {
        return Ok(skipped("no page to prepare"));
    };
    let source_root = page.parent().unwrap_or(&config.root);

    let mut written = Vec::new();
    let mut existing = Vec::new();
    for plan in &ctx.concat_plans {
        if plan.execute(source_root, &config.paths.dist)? {
            written.push(plan.output.as_str());
        } else {
            existing.push(plan.output.as_str());
        }
    }
    Ok(json!({ "written": written, "already_built": existing }))
}

fn copy_assets(ctx: &mut BuildContext) -> Result<Value, BuildError> {
    let report = copy(&ctx.config.copy)?;
    let summary = json!({ "rules": report.rules.len(), "files": report.total_files() });
    ctx.copied = Some(report);
    Ok(summary)
}

fn rewrite_references(config: &BuildConfig) -> Result<Value, BuildError> {
    let dist = &config.paths.dist;
    if !dist.is_dir() {
        return Ok(skipped("no dist dir"));
    }
    let pages = select(&filter("[html] rewrite", &config.html.rewrite)?, dist)?;

    let mut rewritten = 0;
    for relative in &pages {
        let path = dist.join(relative);
        let text = fs::read_to_string(&path).map_err(io_error(&path))?;
        let out = html::rewrite_references(&text, &path)?;
        if out != text {
            fs::write(&path, out).map_err(io_error(&path))?;
            rewritten += 1;
        }
    }
    Ok(json!({ "pages": pages.len(), "rewritten": rewritten }))
}

fn compress_outputs(ctx: &mut BuildContext) -> Result<Value, BuildError> {
    let report = compress(&ctx.config.compress)?;
    let summary = json!({
        "files": report.files.len(),
        "original_bytes": report.original_bytes(),
        "compressed_bytes": report.compressed_bytes(),
    });
    ctx.compressed = Some(report);
    Ok(summary)
}

fn stamp_metadata(ctx: &mut BuildContext) -> Result<Value, BuildError> {
    let config = Arc::clone(&ctx.config);
    let Some(spec) = &config.metadata else {
        return Ok(skipped("no metadata"));
    };
    let stamp = BuildStamp::now(spec.repository.as_deref());
    metadata::stamp(spec, &stamp)?;
    let summary = json!({
        "build_id": stamp.id,
        "build_sha": stamp.sha,
        "output": spec.output,
    });
    ctx.stamp = Some(stamp);
    Ok(summary)
}
