//! Dial errors, classified for reporting.

use thiserror::Error;

/// Upstream dial error type.
///
/// Failures fall into three reportable classes: `Network` (the TCP/bastion
/// path), `Authentication` (the target rejected our key), and `Handshake`
/// (the SSH protocol itself).
#[derive(Error, Debug)]
pub enum DialError {
    /// TCP or tunnel-level failure
    #[error("network error dialing {addr}: {source}")]
    Network {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The peer rejected the offered key
    #[error("authentication failed for {user}@{addr}")]
    Authentication { user: String, addr: String },

    /// SSH protocol failure during session establishment
    #[error("handshake failed with {addr}: {source}")]
    Handshake {
        addr: String,
        #[source]
        source: russh::Error,
    },

    /// Host key rejected by the verification policy
    #[error("host key for {addr} rejected by policy")]
    HostKeyRejected { addr: String },

    /// Key material could not be loaded or decoded
    #[error("key material error for {key_name}: {reason}")]
    Key { key_name: String, reason: String },

    /// Other SSH-level errors surfaced by the client
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

/// Result type for dial operations.
pub type DialResult<T> = Result<T, DialError>;
