//! Error types for collaborator calls.

use thiserror::Error;

/// Store and collaborator error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested row does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A compare-and-set lost the race
    #[error("conflict: {0}")]
    Conflict(String),

    /// Directory authentication failed
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A cloud adapter call failed
    #[error("cloud adapter error: {0}")]
    Adapter(String),

    /// HTTP transport error (webhook notifier)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Anything else
    #[error("store error: {0}")]
    Internal(String),
}

/// Result type for collaborator operations.
pub type StoreResult<T> = Result<T, StoreError>;
