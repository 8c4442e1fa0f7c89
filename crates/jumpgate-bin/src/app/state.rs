//! Shared daemon state.
//!
//! One container constructed at startup and passed to session handlers and
//! background loops. The inventory snapshot inside the cache is the only
//! mutable shared state; everything else is read-only after construction.

use async_trait::async_trait;
use fleet_inventory::InventoryCache;
use jumpgate_core::{Config, KeyRegistry, Paths, SshUser, Target};
use jumpgate_store::{
    CloudAdapter, DirectoryAuth, InstancePage, Notifier, PersistStore, StoreResult,
};
use shell_fanout::UpstreamRunner;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use upstream_dial::{CommandOutput, Dialer};

/// Shared daemon state (thread-safe).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub paths: Arc<Paths>,
    pub store: Arc<dyn PersistStore>,
    pub directory: Arc<dyn DirectoryAuth>,
    pub notifier: Arc<dyn Notifier>,
    pub cache: Arc<InventoryCache>,
}

impl AppState {
    /// Build a dialer against the current key registry. The registry is
    /// reloaded per call so refreshed keys take effect without a restart.
    pub async fn dialer(&self) -> Dialer {
        let keys = match self.store.internal_load_key().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(error = %e, "Key registry load failed, dialing with empty registry");
                Vec::new()
            }
        };
        Dialer::new(
            self.config.host_key_policy,
            self.paths.known_hosts_file(),
            KeyRegistry::new(keys),
            self.config.bastions.clone(),
        )
    }

    /// Where SCP payloads are spooled: the recording dir, or /tmp.
    pub fn spool_dir(&self) -> PathBuf {
        self.config
            .recording_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
    }
}

/// Cloud adapter seam for deployments without a provider integration:
/// enumerates nothing. Provider adapters are plugged in here.
pub struct NullCloudAdapter;

#[async_trait]
impl CloudAdapter for NullCloudAdapter {
    async fn describe_instances(
        &self,
        _profile: &str,
        _region: &str,
        _next_marker: Option<String>,
    ) -> StoreResult<InstancePage> {
        Ok(InstancePage {
            instances: Vec::new(),
            next_marker: None,
        })
    }
}

/// Runner that builds a fresh dialer per call so background loops pick up
/// key registry changes.
pub struct StateRunner {
    pub state: AppState,
}

#[async_trait]
impl UpstreamRunner for StateRunner {
    async fn run(
        &self,
        target: &Target,
        ssh_user: &SshUser,
        shell: &str,
    ) -> Result<CommandOutput, String> {
        let dialer = self.state.dialer().await;
        dialer.run(target, ssh_user, shell).await
    }

    async fn probe(&self, target: &Target, ssh_user: &SshUser) -> Result<(), String> {
        let dialer = self.state.dialer().await;
        dialer.probe(target, ssh_user).await
    }
}
