//! The inventory cache and its refresh loop.

use crate::snapshot::FleetSnapshot;
use arc_swap::ArcSwap;
use jumpgate_core::{CloudProfile, KeyRegistry, SshUser, Target, TargetStatus};
use jumpgate_store::{CloudAdapter, Instance, PersistStore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshStats {
    /// Targets in the published snapshot.
    pub targets: usize,
    /// Profile × region slices that failed and were served from the
    /// previous snapshot.
    pub failed_slices: usize,
}

/// The process-wide inventory cache.
///
/// Reads are lock-free pointer loads; a refresh builds a complete snapshot
/// and publishes it with a single pointer swap. The swap is never held
/// across I/O.
pub struct InventoryCache {
    snapshot: ArcSwap<FleetSnapshot>,
    adapter: Arc<dyn CloudAdapter>,
    store: Arc<dyn PersistStore>,
    profiles: Vec<CloudProfile>,
}

impl InventoryCache {
    pub fn new(
        adapter: Arc<dyn CloudAdapter>,
        store: Arc<dyn PersistStore>,
        profiles: Vec<CloudProfile>,
    ) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(FleetSnapshot::empty()),
            adapter,
            store,
            profiles,
        }
    }

    /// O(1) lookup by host; never blocks on a refresh in progress.
    pub fn get(&self, host: &str) -> Option<Arc<Target>> {
        self.snapshot.load().get(host)
    }

    /// Snapshot of every target; safe to iterate while a refresh proceeds.
    pub fn all(&self) -> Vec<Arc<Target>> {
        self.snapshot.load().all()
    }

    /// The current snapshot handle.
    pub fn snapshot(&self) -> Arc<FleetSnapshot> {
        self.snapshot.load_full()
    }

    /// Run one refresh pass.
    ///
    /// Enumerates enabled profiles × regions through the cloud adapter. A
    /// slice that errors keeps its previous entries; a total failure leaves
    /// the previous snapshot intact.
    pub async fn refresh(&self) -> RefreshStats {
        let started = std::time::Instant::now();

        let registry = match self.store.internal_load_key().await {
            Ok(keys) => KeyRegistry::new(keys),
            Err(e) => {
                error!(error = %e, "Key registry load failed, keeping previous inventory");
                let prev = self.snapshot.load();
                return RefreshStats {
                    targets: prev.len(),
                    failed_slices: 0,
                };
            }
        };

        let prev = self.snapshot.load_full();
        let mut resolved: Vec<Target> = Vec::new();
        let mut failed_slices: HashSet<(String, String)> = HashSet::new();

        for profile in self.profiles.iter().filter(|p| p.enabled) {
            for region in &profile.regions {
                match self.fetch_slice(&profile.name, region).await {
                    Ok(instances) => {
                        resolved.extend(resolve_targets(
                            instances,
                            &registry,
                            &profile.name,
                            region,
                        ));
                    }
                    Err(e) => {
                        warn!(
                            profile = %profile.name,
                            region = %region,
                            error = %e,
                            "Slice enumeration failed, serving previous entries"
                        );
                        failed_slices.insert((profile.name.clone(), region.clone()));
                    }
                }
            }
        }

        // Carry forward previous entries of failed slices untouched, and
        // grant one refresh of grace to targets that went missing from a
        // successful slice.
        let new_ids: HashSet<String> = resolved.iter().map(|t| t.id.clone()).collect();
        let mut pending_removal = HashSet::new();

        for target in prev.all() {
            if new_ids.contains(&target.id) {
                continue;
            }
            let slice = (target.profile.clone(), target.region.clone());
            if failed_slices.contains(&slice) {
                resolved.push((*target).clone());
            } else if !prev.pending_removal().contains(&target.id)
                && target.status == TargetStatus::Running
            {
                pending_removal.insert(target.id.clone());
                resolved.push((*target).clone());
            } else {
                debug!(id = %target.id, host = %target.host, "Dropping departed target");
            }
        }

        let stats = RefreshStats {
            targets: resolved.len(),
            failed_slices: failed_slices.len(),
        };

        self.snapshot
            .store(Arc::new(FleetSnapshot::new(resolved, pending_removal)));

        info!(
            targets = stats.targets,
            failed_slices = stats.failed_slices,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Inventory refresh complete"
        );
        stats
    }

    /// Paginate one profile × region until the adapter reports exhaustion.
    async fn fetch_slice(
        &self,
        profile: &str,
        region: &str,
    ) -> Result<Vec<Instance>, jumpgate_store::StoreError> {
        let mut instances = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .adapter
                .describe_instances(profile, region, marker.take())
                .await?;
            instances.extend(page.instances);
            match page.next_marker {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(instances)
    }
}

/// Default POSIX username implied by the provider platform string.
fn default_username(platform: &str) -> &'static str {
    if platform.contains("Ubuntu") {
        "ubuntu"
    } else if platform == "Linux/UNIX" {
        "ec2-user"
    } else {
        "root"
    }
}

/// Normalise raw instances into usable targets.
///
/// Drops non-running instances, instances without a private address, and
/// instances carrying no key recognised by the registry. Key names are
/// compared lower-cased.
fn resolve_targets(
    instances: Vec<Instance>,
    registry: &KeyRegistry,
    profile: &str,
    region: &str,
) -> Vec<Target> {
    let mut targets = Vec::new();

    for instance in instances {
        if instance.status != TargetStatus::Running {
            continue;
        }
        let Some(host) = instance.private_ips.first() else {
            warn!(instance = %instance.name, "Instance has no private address");
            continue;
        };

        let mut ssh_users = Vec::new();
        for key_name in &instance.key_names {
            let normalised = key_name.to_lowercase();
            if registry.contains(&normalised) {
                ssh_users.push(SshUser {
                    username: default_username(&instance.platform).to_string(),
                    key_name: normalised,
                });
            } else {
                warn!(
                    instance = %instance.name,
                    key = %key_name,
                    "Key not found in registry"
                );
            }
        }
        if ssh_users.is_empty() {
            // Only instances whose keys are registered are taken over.
            continue;
        }

        targets.push(Target {
            id: instance.id,
            name: instance.name,
            host: host.clone(),
            port: 22,
            ssh_users,
            profile: profile.to_string(),
            region: region.to_string(),
            status: instance.status,
            tags: instance.tags,
        });
    }

    targets
}
