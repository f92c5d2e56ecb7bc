//! Pipeline orchestration: a validated, strictly ordered list of stages.

use std::collections::HashMap;
use std::time::Instant;

use rebundle_core::{obs, BuildError};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::context::BuildContext;
use crate::stage::{Stage, StageState};

/// A stage list that cannot run in the given order.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("stage name must not be empty")]
    EmptyName,

    #[error("stage {0} appears more than once")]
    Duplicate(String),

    #[error("stage {stage} depends on {dependency}, which is not part of the plan")]
    UnknownDependency { stage: String, dependency: String },

    #[error("stage {stage} depends on {dependency}, which runs after it")]
    OutOfOrder { stage: String, dependency: String },

    #[error("unknown test suite {suite:?} (available: {})", available.join(", "))]
    UnknownSuite {
        suite: String,
        available: Vec<String>,
    },
}

/// Outcome of one stage in a run.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    pub duration_ms: u64,
    pub details: Value,
}

/// The stage that halted a run and why.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: String,
    pub error: BuildError,
}

/// Result of a complete pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: String,
    pub plan: String,
    pub success: bool,
    /// One entry per planned stage; stages after a failure stay `Pending`.
    pub stages: Vec<StageReport>,
    pub duration_ms: u64,
    pub failure: Option<StageFailure>,
}

impl PipelineResult {
    pub fn succeeded_count(&self) -> usize {
        self.count(StageState::Succeeded)
    }

    pub fn pending_count(&self) -> usize {
        self.count(StageState::Pending)
    }

    fn count(&self, state: StageState) -> usize {
        self.stages.iter().filter(|s| s.state == state).count()
    }

    /// Stage reports for the successful prefix, or the failure.
    pub fn into_result(self) -> Result<Vec<StageReport>, StageFailure> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.stages),
        }
    }
}

/// A named, ordered stage sequence.
pub struct Pipeline {
    name: String,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    /// Validate that every dependency is planned and runs earlier.
    pub fn new(name: impl Into<String>, stages: Vec<Box<dyn Stage>>) -> Result<Self, PlanError> {
        let mut position = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            let stage_name = stage.name();
            if stage_name.trim().is_empty() {
                return Err(PlanError::EmptyName);
            }
            if position.insert(stage_name.to_string(), i).is_some() {
                return Err(PlanError::Duplicate(stage_name.to_string()));
            }
        }

        for (i, stage) in stages.iter().enumerate() {
            for dependency in stage.dependencies() {
                match position.get(&dependency) {
                    None => {
                        return Err(PlanError::UnknownDependency {
                            stage: stage.name().to_string(),
                            dependency,
                        })
                    }
                    Some(&at) if at >= i => {
                        return Err(PlanError::OutOfOrder {
                            stage: stage.name().to_string(),
                            dependency,
                        })
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self {
            name: name.into(),
            stages,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }

    /// `(stage, dependencies)` in execution order.
    pub fn describe(&self) -> Vec<(String, Vec<String>)> {
        self.stages
            .iter()
            .map(|s| (s.name().to_string(), s.dependencies()))
            .collect()
    }

    /// SHA-256 over the ordered stage names.
    pub fn digest(&self) -> String {
        plan_digest(&self.stage_names())
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, halting at the first failure.
    ///
    /// Output of the failed stage is left in place for inspection.
    pub async fn run(&self, ctx: &mut BuildContext) -> PipelineResult {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::pipeline_span(&run_id, &self.name);
        self.run_stages(run_id, ctx).instrument(span).await
    }

    async fn run_stages(&self, run_id: String, ctx: &mut BuildContext) -> PipelineResult {
        let start = Instant::now();
        obs::emit_pipeline_started(&run_id, self.stages.len());
        info!(plan = %self.name, digest = %self.digest(), "starting pipeline");

        let mut reports: Vec<StageReport> = self
            .stages
            .iter()
            .map(|s| StageReport {
                name: s.name().to_string(),
                state: StageState::Pending,
                duration_ms: 0,
                details: Value::Null,
            })
            .collect();
        let mut failure = None;

        for (stage, report) in self.stages.iter().zip(reports.iter_mut()) {
            report.state = StageState::Running;
            obs::emit_stage_started(stage.name());
            let stage_start = Instant::now();

            let outcome = stage.run(ctx).await;
            report.duration_ms = stage_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(details) => {
                    report.state = StageState::Succeeded;
                    report.details = details;
                    obs::emit_stage_finished(stage.name(), report.duration_ms);
                }
                Err(error) => {
                    report.state = StageState::Failed;
                    obs::emit_stage_failed(stage.name(), &error);
                    failure = Some(StageFailure {
                        stage: stage.name().to_string(),
                        error,
                    });
                    break;
                }
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let success = failure.is_none();
        obs::emit_pipeline_finished(&run_id, duration_ms, success);

        PipelineResult {
            run_id,
            plan: self.name.clone(),
            success,
            stages: reports,
            duration_ms,
            failure,
        }
    }
}

/// Deterministic digest of ordered stage names.
pub fn plan_digest(stages: &[String]) -> String {
    let mut hasher = Sha256::new();
    for stage in stages {
        hasher.update(stage.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
