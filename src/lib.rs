//! Interview question pipeline
//!
//! Turns an ordered list of skills into a stream of generated interview
//! question sets. Skills are batched, discovered and generated through two
//! external capabilities under per-service rate limits, bounded concurrency,
//! classified retries and a per-call token budget.

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod providers;
pub mod resilience;

pub use config::{Config, LoggingConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{PipelineEvent, PipelineOrchestrator, PipelineRun, RunSummary, SkillResult};
pub use providers::{QuestionGenerator, SourceDiscoverer};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber. Logs go to stderr.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this more
/// than once is a no-op.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
