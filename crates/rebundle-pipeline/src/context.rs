//! State shared between the stages of one run.

use std::sync::Arc;

use rebundle_core::{
    BuildConfig, BuildStamp, BundleGraph, BundleOutput, CompressReport, ConcatPlan, CopyReport,
    PatchReport,
};

/// Configuration plus what earlier stages produced.
///
/// Created fresh for every run; nothing here outlives the process.
#[derive(Debug)]
pub struct BuildContext {
    pub config: Arc<BuildConfig>,
    pub patches: Vec<PatchReport>,
    pub concat_plans: Vec<ConcatPlan>,
    pub graph: Option<BundleGraph>,
    pub bundles: Vec<BundleOutput>,
    /// Units dropped under the `skip-unit` rewrite policy.
    pub skipped_units: Vec<String>,
    pub copied: Option<CopyReport>,
    pub compressed: Option<CompressReport>,
    pub stamp: Option<BuildStamp>,
}

impl BuildContext {
    pub fn new(config: Arc<BuildConfig>) -> Self {
        Self {
            config,
            patches: Vec::new(),
            concat_plans: Vec::new(),
            graph: None,
            bundles: Vec::new(),
            skipped_units: Vec::new(),
            copied: None,
            compressed: None,
            stamp: None,
        }
    }
}
