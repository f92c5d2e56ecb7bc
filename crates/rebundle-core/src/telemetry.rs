//! Tracing setup for the `rebundle` binary.
//!
//! Log output is scoped to rebundle's own crates: external tools and
//! third-party libraries only surface warnings unless a filter says otherwise.
//! `REBUNDLE_LOG` takes precedence over `RUST_LOG`; both accept `EnvFilter`
//! directives.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding rebundle's log filter.
pub const LOG_ENV: &str = "REBUNDLE_LOG";

/// Targets emitted by the rebundle crates.
const TARGETS: &[&str] = &["rebundle", "rebundle_core", "rebundle_pipeline"];

/// `warn` for everything, `level` for rebundle's own targets.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(TARGETS.iter().map(|t| format!("{t}={level}")));
    directives.join(",")
}

/// Filter from an explicit directive string, falling back to the defaults
/// when it is absent or does not parse.
fn filter_from(spec: Option<&str>, level: Level) -> EnvFilter {
    spec.and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives(level)))
}

fn env_spec() -> Option<String> {
    [LOG_ENV, EnvFilter::DEFAULT_ENV]
        .into_iter()
        .find_map(|name| std::env::var(name).ok())
        .filter(|s| !s.trim().is_empty())
}

/// Install the global subscriber.
///
/// * `json` - newline-delimited JSON with span context (run id, plan).
/// * `level` - verbosity for rebundle targets when no filter is set.
///
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter = filter_from(env_spec().as_deref(), level);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .ok();
    }
}
