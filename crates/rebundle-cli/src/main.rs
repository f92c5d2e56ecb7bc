//! rebundle CLI
//!
//! Build orchestration for shipping a vendored editor tree as a browser bundle.
//!
//! ## Commands
//!
//! - `rebundle build` - Run the full build sequence (clean through metadata)
//! - `rebundle check` - Run every configured lint command
//! - `rebundle test [SUITE]` - Run one test suite (default: all)
//! - `rebundle publish [--simulate]` - Publish the server package
//! - `rebundle graph` - Print the bundle units discovery would build
//! - `rebundle stages` - Print the build plan and its digest

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rebundle_core::config::{CONFIG_ENV, DEFAULT_CONFIG_FILE};
use rebundle_core::obs::PipelineSpan;
use rebundle_core::{publish, BuildConfig, PublishSpec};
use rebundle_pipeline::{
    build_graph, build_plan, check_plan, test_plan, BuildContext, Pipeline, PipelineResult,
    StageState,
};
use serde::Serialize;
use tracing::{info, Level};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "rebundle")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Patch, bundle and package a vendored web application")]
struct Cli {
    /// Build configuration file
    #[arg(short, long, global = true, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs and reports as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full build sequence
    Build,

    /// Run every configured lint command
    Check,

    /// Run a test suite
    Test {
        /// Suite name from the [test] table
        suite: Option<String>,
    },

    /// Publish the server package with dependency directories hidden
    Publish {
        /// Run the simulate command (install locally) instead of publishing
        #[arg(long)]
        simulate: bool,
    },

    /// Print the bundle units the build would produce
    Graph,

    /// Print the build stages in execution order
    Stages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    rebundle_core::telemetry::init_tracing(cli.json, level);

    match cli.command {
        Commands::Build => {
            let config = load_config(&cli.config)?;
            let plan = build_plan()?;
            cmd_run(config, plan, cli.json).await
        }
        Commands::Check => {
            let config = load_config(&cli.config)?;
            let plan = check_plan(&config)?;
            cmd_run(config, plan, cli.json).await
        }
        Commands::Test { suite } => {
            let config = load_config(&cli.config)?;
            let plan = test_plan(&config, suite.as_deref())?;
            cmd_run(config, plan, cli.json).await
        }
        Commands::Publish { simulate } => {
            let config = load_config(&cli.config)?;
            cmd_publish(&config, simulate)
        }
        Commands::Graph => {
            let config = load_config(&cli.config)?;
            cmd_graph(&config)
        }
        Commands::Stages => cmd_stages(cli.json),
    }
}

fn load_config(path: &Path) -> Result<Arc<BuildConfig>> {
    let config = BuildConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    Ok(Arc::new(config))
}

#[derive(Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    plan: &'a str,
    success: bool,
    duration_ms: u64,
    stages: &'a [rebundle_pipeline::StageReport],
    failure: Option<FailureSummary>,
}

#[derive(Serialize)]
struct FailureSummary {
    stage: String,
    error: String,
}

async fn cmd_run(config: Arc<BuildConfig>, plan: Pipeline, json: bool) -> Result<()> {
    if plan.is_empty() {
        println!("Nothing to run for {}", plan.name());
        return Ok(());
    }

    let mut ctx = BuildContext::new(config);
    let result = plan.run(&mut ctx).await;

    if json {
        print_json(&result)?;
    } else {
        print_report(&result);
    }

    match result.into_result() {
        Ok(_) => Ok(()),
        Err(failure) => Err(anyhow::Error::new(failure.error)
            .context(format!("stage {} failed", failure.stage))),
    }
}

fn print_json(result: &PipelineResult) -> Result<()> {
    let summary = RunSummary {
        run_id: &result.run_id,
        plan: &result.plan,
        success: result.success,
        duration_ms: result.duration_ms,
        stages: &result.stages,
        failure: result.failure.as_ref().map(|f| FailureSummary {
            stage: f.stage.clone(),
            error: f.error.to_string(),
        }),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_report(result: &PipelineResult) {
    println!("Run ID: {}", result.run_id);
    println!(
        "Status: {}",
        if result.success { "✓ PASSED" } else { "✗ FAILED" }
    );
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for stage in &result.stages {
        let marker = match stage.state {
            StageState::Succeeded => "✓",
            StageState::Failed => "✗",
            StageState::Pending | StageState::Running => "-",
        };
        println!("  {} {} ({}ms)", marker, stage.name, stage.duration_ms);
    }

    println!();
    println!(
        "Summary: {}/{} stages succeeded",
        result.succeeded_count(),
        result.stages.len()
    );
}

/// `[publish]` when configured, otherwise the defaults over the server dist.
fn publish_spec(config: &BuildConfig) -> PublishSpec {
    config
        .publish
        .clone()
        .unwrap_or_else(|| PublishSpec::new(&config.paths.server_dist))
}

fn cmd_publish(config: &BuildConfig, simulate: bool) -> Result<()> {
    let spec = publish_spec(config);
    if !spec.root.is_dir() {
        bail!(
            "Package directory {} does not exist; run `rebundle build` first",
            spec.root.display()
        );
    }

    let plan = if simulate { "publish-simulate" } else { "publish" };
    let run_id = Uuid::new_v4().to_string();
    let _span = PipelineSpan::enter(&run_id, plan);

    let hidden = publish::publish(&spec, simulate)
        .with_context(|| format!("Failed to publish {}", spec.root.display()))?;

    info!(hidden, "publish finished");
    println!("✓ Published {}", spec.root.display());
    if hidden > 0 {
        println!("  ({} dependency directories hidden and restored)", hidden);
    }
    Ok(())
}

fn cmd_graph(config: &BuildConfig) -> Result<()> {
    let Some(graph) = build_graph(config)? else {
        bail!("No [bundle] section configured");
    };
    println!("{}", serde_json::to_string_pretty(graph.units())?);
    Ok(())
}

fn cmd_stages(json: bool) -> Result<()> {
    let plan = build_plan()?;
    let described = plan.describe();

    if json {
        let value = serde_json::json!({
            "digest": plan.digest(),
            "stages": described
                .iter()
                .map(|(name, deps)| serde_json::json!({ "name": name, "requires": deps }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    for (i, (name, deps)) in described.iter().enumerate() {
        if deps.is_empty() {
            println!("{:>2}. {}", i + 1, name);
        } else {
            println!("{:>2}. {} (after {})", i + 1, name, deps.join(", "));
        }
    }
    println!();
    println!("Digest: {}", plan.digest());
    Ok(())
}
