//! Crate-level error type

use thiserror::Error;

/// Errors raised while configuring or starting a pipeline.
///
/// Failures of individual external calls never surface here; they are
/// classified and turned into `Failed` skill results by the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] ::config::ConfigError),

    #[error("Provider initialization failed: {0}")]
    Provider(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
