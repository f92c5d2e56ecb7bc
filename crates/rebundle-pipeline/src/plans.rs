//! Stage plans behind the `build`, `check` and `test` entry points.

use rebundle_core::config::DEFAULT_TEST_SUITE;
use rebundle_core::BuildConfig;

use crate::pipeline::{Pipeline, PlanError};
use crate::stage::{BuiltinStage, CommandStage, Stage};

/// Every built-in stage in order.
pub fn build_plan() -> Result<Pipeline, PlanError> {
    let stages = BuiltinStage::ALL
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn Stage>)
        .collect();
    Pipeline::new("build", stages)
}

/// One command stage per configured lint, in name order.
pub fn check_plan(config: &BuildConfig) -> Result<Pipeline, PlanError> {
    let stages = config
        .lint
        .iter()
        .map(|(name, command)| {
            Box::new(CommandStage::new(
                name.as_str(),
                command.clone(),
                &config.root,
                config.tools.timeout_secs,
            )) as Box<dyn Stage>
        })
        .collect();
    Pipeline::new("check", stages)
}

/// The named test suite, [`DEFAULT_TEST_SUITE`] when `suite` is `None`.
pub fn test_plan(config: &BuildConfig, suite: Option<&str>) -> Result<Pipeline, PlanError> {
    let suite = suite.unwrap_or(DEFAULT_TEST_SUITE);
    let Some(command) = config.test.get(suite) else {
        return Err(PlanError::UnknownSuite {
            suite: suite.to_string(),
            available: config.test.keys().cloned().collect(),
        });
    };
    let stage = CommandStage::new(
        format!("test:{suite}"),
        command.clone(),
        &config.root,
        config.tools.timeout_secs,
    );
    Pipeline::new("test", vec![Box::new(stage)])
}
