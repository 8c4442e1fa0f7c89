//! Liveness probing.
//!
//! A configured checklist of hosts is dialed on a timer. The first failure
//! for a host raises one urgent notification and arms an alarm; repeated
//! failures stay silent until a successful probe clears the alarm and sends
//! a recovery notice.

use crate::executor::UpstreamRunner;
use chrono::Utc;
use fleet_inventory::FleetSnapshot;
use jumpgate_store::Notifier;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Probes the checklist hosts and manages alarm state.
pub struct LivenessProber {
    runner: Arc<dyn UpstreamRunner>,
    notifier: Arc<dyn Notifier>,
    webhook_token: Option<String>,
    alarmed: Mutex<HashSet<String>>,
}

impl LivenessProber {
    pub fn new(
        runner: Arc<dyn UpstreamRunner>,
        notifier: Arc<dyn Notifier>,
        webhook_token: Option<String>,
    ) -> Self {
        Self {
            runner,
            notifier,
            webhook_token,
            alarmed: Mutex::new(HashSet::new()),
        }
    }

    /// Probe every checklist host against the current fleet snapshot.
    pub async fn probe_all(&self, snapshot: &FleetSnapshot, hosts: &[String]) {
        let started = std::time::Instant::now();

        for host in hosts {
            let Some(target) = snapshot.get(host) else {
                error!(host = %host, "Liveness host not in fleet");
                self.notify(&format!(
                    "(urgent) host {host} not found in fleet, update the checklist if it was retired"
                ))
                .await;
                continue;
            };
            let Some(ssh_user) = target.default_ssh_user().cloned() else {
                warn!(host = %host, "Liveness host has no usable credentials");
                continue;
            };

            match self.runner.probe(&target, &ssh_user).await {
                Ok(()) => {
                    let recovered = self.alarmed.lock().await.remove(host);
                    if recovered {
                        info!(host = %host, "Liveness recovered");
                        self.notify(&format!(
                            "host ssh connection recovered\nname: {}\nhost: {}\nuser: {}\ntime: {}",
                            target.name,
                            host,
                            ssh_user.username,
                            Utc::now().to_rfc3339(),
                        ))
                        .await;
                    }
                }
                Err(e) => {
                    let newly_alarmed = self.alarmed.lock().await.insert(host.clone());
                    if newly_alarmed {
                        warn!(host = %host, error = %e, "Liveness probe failed");
                        self.notify(&format!(
                            "(urgent) host ssh connection failed\nname: {}\nhost: {}\nuser: {}\ntime: {}\nerror: {}",
                            target.name,
                            host,
                            ssh_user.username,
                            Utc::now().to_rfc3339(),
                            e,
                        ))
                        .await;
                    }
                }
            }
        }

        info!(
            hosts = hosts.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Liveness round complete"
        );
    }

    async fn notify(&self, text: &str) {
        let Some(token) = &self.webhook_token else {
            return;
        };
        if let Err(e) = self.notifier.send_text(token, text).await {
            error!(error = %e, "Failed to send liveness notification");
        }
    }
}
