//! Error types for the SCP codec.

use thiserror::Error;

/// SCP protocol error type.
#[derive(Error, Debug)]
pub enum ScpError {
    /// IO error on the channel or the spool file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed control record or unexpected byte
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The peer answered an ACK with a warning
    #[error("remote warning: {0}")]
    RemoteWarning(String),

    /// The peer answered an ACK with a fatal error
    #[error("remote error: {0}")]
    RemoteFatal(String),

    /// Payload did not match the advertised size
    #[error("file size not match: expected {expected} bytes")]
    SizeMismatch { expected: u64 },
}

/// Result type for SCP operations.
pub type ScpResult<T> = Result<T, ScpError>;

impl ScpError {
    /// The message sent to the originator on failure: single line, newlines
    /// replaced with spaces.
    pub fn wire_message(&self) -> String {
        self.to_string().replace('\n', " ")
    }
}
