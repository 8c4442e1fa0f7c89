//! Domain model for the bastion: targets, credentials, users, policies,
//! scheduled tasks, and audit rows.

use crate::filter::ServerFilter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use uuid::Uuid;

/// Default SSH port for discovered targets.
pub const DEFAULT_TARGET_PORT: u16 = 22;

/// Lifecycle status of a discovered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Running,
    Stopped,
    Terminated,
}

/// A discovered remote host that users may log in to through the proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Stable provider identity (instance id).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Reachable address (first private IP).
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// Acceptable login users, in registered order.
    pub ssh_users: Vec<SshUser>,
    /// Cloud profile the instance was discovered under.
    pub profile: String,
    /// Cloud region.
    pub region: String,
    /// Instance lifecycle status.
    pub status: TargetStatus,
    /// Freeform provider tags.
    pub tags: HashMap<String, String>,
}

impl Target {
    /// A target is reachable when it is running and carries at least one
    /// usable credential.
    pub fn is_reachable(&self) -> bool {
        self.status == TargetStatus::Running && !self.ssh_users.is_empty()
    }

    /// First registered ssh user, the documented deterministic choice when a
    /// target carries several.
    pub fn default_ssh_user(&self) -> Option<&SshUser> {
        self.ssh_users.first()
    }

    /// Look up an ssh user by POSIX username.
    pub fn ssh_user(&self, username: &str) -> Option<&SshUser> {
        self.ssh_users.iter().find(|u| u.username == username)
    }
}

/// A resolved login identity for a target: POSIX username plus the named
/// key pair that authenticates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshUser {
    pub username: String,
    /// Lower-cased name of the key pair in the registry.
    pub key_name: String,
}

/// Named private-key record from the key registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// Logical name; compared case-insensitively.
    pub name: String,
    /// On-disk PEM path.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Inline base64-encoded PEM, used when no file is configured.
    #[serde(default)]
    pub pem_base64: Option<String>,
}

/// Key registry with case-insensitive lookup.
///
/// Cloud providers report key names in mixed case; the registry normalises
/// to lower case at insert and lookup.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    keys: HashMap<String, KeyPair>,
}

impl KeyRegistry {
    pub fn new(keys: impl IntoIterator<Item = KeyPair>) -> Self {
        Self {
            keys: keys
                .into_iter()
                .map(|k| (k.name.to_lowercase(), k))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&KeyPair> {
        self.keys.get(&name.to_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keys.contains_key(&name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Directory identity of an end user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// Group memberships; the primary subject of policy rules.
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Authorized public keys in OpenSSH one-line format.
    #[serde(default)]
    pub public_keys: Vec<String>,
}

/// Actions a policy can grant. `DenyAll` is a sentinel that forbids
/// everything for the matched subjects and targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Login,
    Upload,
    Download,
    Connect,
    DenyAll,
}

/// A rule binding subjects (users/groups) to actions on a filtered set of
/// targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    /// Individual user subjects. Empty together with `groups` means "any".
    #[serde(default)]
    pub users: BTreeSet<String>,
    /// Group subjects, union semantics with `users`.
    #[serde(default)]
    pub groups: BTreeSet<String>,
    /// Conjunction of target axes.
    #[serde(default)]
    pub filter: ServerFilter,
    pub actions: BTreeSet<Action>,
    /// Expired policies are ignored. `None` never expires.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Policy {
    /// Whether the policy has expired as of `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Whether the policy's subject set matches the user. Empty user and
    /// group sets mean wildcard.
    pub fn matches_subject(&self, user: &User) -> bool {
        if self.users.is_empty() && self.groups.is_empty() {
            return true;
        }
        if self.users.contains(&user.name) {
            return true;
        }
        user.groups.iter().any(|g| self.groups.contains(g))
    }
}

/// Shell fan-out task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Draft,
    Pending,
    Running,
    Success,
    NotAllSuccess,
    Failed,
}

/// A scheduled or one-shot shell fan-out job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTask {
    pub uuid: Uuid,
    pub name: String,
    /// Command text executed on every matched target.
    pub shell: String,
    #[serde(default)]
    pub filter: ServerFilter,
    /// Cron expression (seconds-resolution grammar); empty means manual.
    #[serde(default)]
    pub cron: Option<String>,
    /// Number of completed executions.
    #[serde(default)]
    pub exec_times: u32,
    pub status: TaskStatus,
}

/// Immutable audit row for an interactive session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub user: String,
    pub client_addr: String,
    pub target: String,
    pub ssh_user: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Recording artifact path, when session recording is enabled.
    #[serde(default)]
    pub recording: Option<PathBuf>,
}

/// Direction of an SCP transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScpDirection {
    Upload,
    Download,
}

/// Immutable audit row for a completed SCP transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScpRecord {
    pub action: ScpDirection,
    pub from: String,
    pub to: String,
    pub user: String,
    pub client_addr: String,
    pub byte_count: u64,
    pub at: DateTime<Utc>,
}

/// Per-host result row for one shell fan-out execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTaskRecord {
    pub task_id: Uuid,
    pub task_name: String,
    pub exec_times: u32,
    pub server_name: String,
    pub server_ip: String,
    pub shell: String,
    pub is_success: bool,
    /// Joined stdout + stderr of the remote command.
    pub output: String,
    pub cost_ms: u64,
}
