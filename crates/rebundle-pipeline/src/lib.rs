//! rebundle pipeline - ordered build stages over the core primitives
//!
//! Provides:
//! - The fixed build sequence (clean through metadata) as built-in stages
//! - Command stages for lint and test entry points
//! - An orchestrator that validates stage order and halts on the first failure

pub mod context;
pub mod pipeline;
pub mod plans;
pub mod runner;
pub mod stage;
pub mod stages;

pub use context::BuildContext;
pub use pipeline::{plan_digest, Pipeline, PipelineResult, PlanError, StageFailure, StageReport};
pub use plans::{build_plan, check_plan, test_plan};
pub use runner::{CommandResult, ToolRunner};
pub use stage::{BuiltinStage, CommandStage, Stage, StageState};
pub use stages::build_graph;
