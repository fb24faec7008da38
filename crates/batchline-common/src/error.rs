//! Error types shared across the batchline workspace

use thiserror::Error;

/// Result type alias for batchline operations
pub type Result<T> = std::result::Result<T, BatchlineError>;

/// Main error type for batchline infrastructure concerns
#[derive(Error, Debug)]
pub enum BatchlineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid run parameters: {0}")]
    InvalidParameters(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}
