//! Error types shared across the jumpgate workspace.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug)]
pub enum CoreError {
    /// IO error (config file, recording directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration document could not be parsed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem path resolution failed
    #[error("Path error: {0}")]
    Path(String),

    /// Configuration is present but invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
