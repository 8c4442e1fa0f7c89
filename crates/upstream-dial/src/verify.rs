//! Host key verification for upstream connections.

use crate::DialError;
use jumpgate_core::HostKeyPolicy;
use russh::client;
use russh::keys::known_hosts::learn_known_hosts_path;
use russh::keys::{check_known_hosts_path, PublicKey};
use std::path::PathBuf;
use tracing::{info, warn};

/// Client handler applying the configured host key policy.
///
/// `strict` only accepts keys already present in the known-hosts file;
/// `trust-on-first-use` records the first key seen per host and rejects
/// changes after; `insecure` accepts anything.
pub struct HostKeyVerifier {
    policy: HostKeyPolicy,
    known_hosts: PathBuf,
    host: String,
    port: u16,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy, known_hosts: PathBuf, host: &str, port: u16) -> Self {
        Self {
            policy,
            known_hosts,
            host: host.to_string(),
            port,
        }
    }
}

impl client::Handler for HostKeyVerifier {
    type Error = DialError;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, DialError> {
        match self.policy {
            HostKeyPolicy::Insecure => Ok(true),
            HostKeyPolicy::Strict => {
                match check_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    &self.known_hosts,
                ) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        warn!(host = %self.host, "Host key unknown under strict policy");
                        Ok(false)
                    }
                    Err(e) => {
                        warn!(host = %self.host, error = %e, "Host key check failed");
                        Ok(false)
                    }
                }
            }
            HostKeyPolicy::TrustOnFirstUse => {
                match check_known_hosts_path(
                    &self.host,
                    self.port,
                    server_public_key,
                    &self.known_hosts,
                ) {
                    Ok(true) => Ok(true),
                    Ok(false) => {
                        info!(host = %self.host, "Recording host key on first use");
                        if let Err(e) = learn_known_hosts_path(
                            &self.host,
                            self.port,
                            server_public_key,
                            &self.known_hosts,
                        ) {
                            warn!(host = %self.host, error = %e, "Failed to record host key");
                        }
                        Ok(true)
                    }
                    Err(e) => {
                        // A changed key is a rejection, not a relearn.
                        warn!(host = %self.host, error = %e, "Host key mismatch");
                        Ok(false)
                    }
                }
            }
        }
    }
}
