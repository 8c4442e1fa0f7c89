//! File system paths for the bastion daemon.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths for the daemon.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.jumpgate)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.jumpgate`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".jumpgate"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.jumpgate).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.jumpgate/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the default host key path (~/.jumpgate/host_ed25519).
    pub fn host_key_file(&self) -> PathBuf {
        self.base_dir.join("host_ed25519")
    }

    /// Get the default recording directory (~/.jumpgate/recordings).
    pub fn recording_dir(&self) -> PathBuf {
        self.base_dir.join("recordings")
    }

    /// Get the known-hosts file used by the strict and trust-on-first-use
    /// host key policies (~/.jumpgate/known_hosts).
    pub fn known_hosts_file(&self) -> PathBuf {
        self.base_dir.join("known_hosts")
    }

    /// Ensure all runtime directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.recording_dir())?;
        Ok(())
    }
}
