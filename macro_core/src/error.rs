//! Error types for the macro_core library.

use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for macro_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Engine configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A macro rule body could not be parsed
    #[error("Malformed rule {rule_id}: {message}")]
    Configuration { rule_id: i64, message: String },

    /// Metric or workout data needed for evaluation is missing
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// A collaborator fetch or write failed
    #[error("Downstream error: {0}")]
    Downstream(String),

    /// Caller input was rejected (unknown anchor, unreadable preview)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The applied plan does not exist
    #[error("Applied plan {0} not found")]
    PlanNotFound(i64),

    /// Generic error
    #[error("{0}")]
    Other(String),
}
