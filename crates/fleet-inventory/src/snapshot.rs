//! Immutable snapshot views over the fleet.
//!
//! Snapshots are built in full by a refresh and never mutated afterwards;
//! readers clone the Arc and iterate freely while the next refresh builds
//! its replacement.

use jumpgate_core::Target;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An immutable view of all reachable targets with derived lookup indexes.
#[derive(Debug, Default)]
pub struct FleetSnapshot {
    by_id: HashMap<String, Arc<Target>>,
    by_host: HashMap<String, Arc<Target>>,
    by_tag: HashMap<(String, String), Vec<Arc<Target>>>,
    /// Target ids absent from the refresh that built this snapshot but
    /// carried over once; absent again next refresh means removal.
    pending_removal: HashSet<String>,
}

impl FleetSnapshot {
    /// Build a snapshot and its derived views from resolved targets.
    pub fn new(targets: Vec<Target>, pending_removal: HashSet<String>) -> Self {
        let mut by_id = HashMap::with_capacity(targets.len());
        let mut by_host = HashMap::with_capacity(targets.len());
        let mut by_tag: HashMap<(String, String), Vec<Arc<Target>>> = HashMap::new();

        for target in targets {
            let target = Arc::new(target);
            for (key, value) in &target.tags {
                by_tag
                    .entry((key.clone(), value.clone()))
                    .or_default()
                    .push(target.clone());
            }
            by_host.insert(target.host.clone(), target.clone());
            by_id.insert(target.id.clone(), target);
        }

        Self {
            by_id,
            by_host,
            by_tag,
            pending_removal,
        }
    }

    /// An empty snapshot, the state before the first refresh completes.
    pub fn empty() -> Self {
        Self::default()
    }

    /// O(1) lookup by reachable host address.
    pub fn get(&self, host: &str) -> Option<Arc<Target>> {
        self.by_host.get(host).cloned()
    }

    /// O(1) lookup by provider instance id.
    pub fn get_by_id(&self, id: &str) -> Option<Arc<Target>> {
        self.by_id.get(id).cloned()
    }

    /// Targets carrying the given tag value.
    pub fn by_tag(&self, key: &str, value: &str) -> Vec<Arc<Target>> {
        self.by_tag
            .get(&(key.to_string(), value.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every target; safe to iterate while a refresh proceeds.
    pub fn all(&self) -> Vec<Arc<Target>> {
        self.by_id.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub(crate) fn pending_removal(&self) -> &HashSet<String> {
        &self.pending_removal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jumpgate_core::{SshUser, TargetStatus};

    fn target(id: &str, host: &str, env: &str) -> Target {
        Target {
            id: id.into(),
            name: format!("node-{id}"),
            host: host.into(),
            port: 22,
            ssh_users: vec![SshUser {
                username: "ubuntu".into(),
                key_name: "prod".into(),
            }],
            profile: "p1".into(),
            region: "r1".into(),
            status: TargetStatus::Running,
            tags: [("env".to_string(), env.to_string())].into(),
        }
    }

    #[test]
    fn test_lookup_views() {
        let snapshot = FleetSnapshot::new(
            vec![
                target("i-1", "10.0.0.1", "staging"),
                target("i-2", "10.0.0.2", "prod"),
            ],
            HashSet::new(),
        );

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("10.0.0.1").unwrap().id, "i-1");
        assert_eq!(snapshot.get_by_id("i-2").unwrap().host, "10.0.0.2");
        assert!(snapshot.get("10.9.9.9").is_none());

        let staging = snapshot.by_tag("env", "staging");
        assert_eq!(staging.len(), 1);
        assert_eq!(staging[0].id, "i-1");
        assert!(snapshot.by_tag("env", "dev").is_empty());
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = FleetSnapshot::empty();
        assert!(snapshot.is_empty());
        assert!(snapshot.all().is_empty());
    }
}
