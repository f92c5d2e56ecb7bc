//! Structured lifecycle events for pipeline runs.
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered out of JSON logs (`--json`) by name.

use std::path::Path;

use tracing::info;

/// RAII guard that scopes all log lines of one pipeline run under its id.
pub struct PipelineSpan {
    _span: tracing::span::EnteredSpan,
}

impl PipelineSpan {
    pub fn enter(run_id: &str, plan: &str) -> Self {
        Self {
            _span: pipeline_span(run_id, plan).entered(),
        }
    }
}

/// The `rebundle.pipeline` span, for attaching to futures with `Instrument`.
pub fn pipeline_span(run_id: &str, plan: &str) -> tracing::Span {
    tracing::info_span!("rebundle.pipeline", run_id = %run_id, plan = %plan)
}

pub fn emit_pipeline_started(run_id: &str, stage_count: usize) {
    info!(event = "pipeline.started", run_id = %run_id, stages = stage_count);
}

pub fn emit_pipeline_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "pipeline.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: &str, duration_ms: u64) {
    info!(event = "stage.finished", stage = %stage, duration_ms = duration_ms);
}

/// Stage failure (error level).
pub fn emit_stage_failed(stage: &str, error: &dyn std::fmt::Display) {
    tracing::error!(event = "stage.failed", stage = %stage, error = %error);
}

pub fn emit_patch_applied(set: &str, index: usize, patch: &Path) {
    info!(event = "patch.applied", set = %set, index = index, patch = %patch.display());
}

pub fn emit_rewrite_applied(module: &str, kind: &str) {
    tracing::debug!(event = "rewrite.applied", module = %module, kind = %kind);
}

pub fn emit_unit_bundled(unit: &str, modules: usize, output: &Path) {
    info!(
        event = "unit.bundled",
        unit = %unit,
        modules = modules,
        output = %output.display(),
    );
}
