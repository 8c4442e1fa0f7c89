//! Session-level error types.

use thiserror::Error;

/// Relay error type, spanning the session lifecycle from selection to
/// teardown.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The governing policy denied the requested action
    #[error("permission denied: {action} not allowed for {target}")]
    PolicyDenied { action: String, target: String },

    /// The requested host is not in the fleet
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// SCP wire protocol failure
    #[error(transparent)]
    Scp(#[from] scp_wire::ScpError),

    /// Upstream dial failure
    #[error(transparent)]
    Dial(#[from] upstream_dial::DialError),

    /// Downstream or spool IO failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH channel failure
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// The session idled past its deadline
    #[error("session idle timeout")]
    IdleTimeout,

    /// The owning session was cancelled
    #[error("session cancelled")]
    Cancelled,

    /// Anything that should never reach the user verbatim
    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// One-line message safe to show the originator: no internal paths, no
    /// rule names.
    pub fn user_message(&self) -> String {
        match self {
            RelayError::PolicyDenied { action, target } => {
                format!("permission denied: {action} not allowed for {target}")
            }
            RelayError::TargetNotFound(host) => format!("target not found: {host}"),
            RelayError::Scp(e) => e.wire_message(),
            RelayError::IdleTimeout => "session closed: idle timeout".to_string(),
            RelayError::Dial(_) => "upstream connection failed".to_string(),
            _ => "internal error".to_string(),
        }
        .replace('\n', " ")
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
