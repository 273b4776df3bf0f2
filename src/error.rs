//! Error types for Workpulse

use thiserror::Error;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Failed to parse observation payload: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid analysis period: {0}")]
    InvalidPeriod(String),

    #[error("Sessionization fault: {0}")]
    SessionizationFault(String),

    #[error("Narrative generation failed: {0}")]
    NarrativeError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Analysis task failed: {0}")]
    TaskError(String),
}
