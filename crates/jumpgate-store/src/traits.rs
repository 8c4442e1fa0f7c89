//! The collaborator contracts.

use crate::StoreResult;
use async_trait::async_trait;
use jumpgate_core::{
    KeyPair, Policy, ScpRecord, SessionRecord, ShellTask, ShellTaskRecord, TargetStatus,
    TaskStatus, User,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Persistence collaborator: users, policies, key material, tasks, and audit
/// rows.
///
/// Audit writes (`add_scp_record`, `create_shell_task_record`,
/// `record_session`) are fire-and-forget from the caller's point of view:
/// callers log failures and never fail the user operation on them.
#[async_trait]
pub trait PersistStore: Send + Sync {
    /// Look up a directory user by name.
    async fn describe_user(&self, name: &str) -> StoreResult<User>;

    /// Policies whose subject set can match the named user, plus wildcard
    /// policies. Callers re-check subjects during evaluation.
    async fn query_policy_by_user(&self, name: &str) -> StoreResult<Vec<Policy>>;

    /// The key registry including private material. Never exposed upstream.
    async fn internal_load_key(&self) -> StoreResult<Vec<KeyPair>>;

    /// All shell fan-out tasks.
    async fn list_shell_task(&self) -> StoreResult<Vec<ShellTask>>;

    /// Unconditionally set a task's status and message.
    async fn update_shell_task_status(
        &self,
        uuid: Uuid,
        status: TaskStatus,
        msg: &str,
    ) -> StoreResult<()>;

    /// Compare-and-set `Pending → Running`. Returns true when this caller
    /// won the claim; false when the task was not pending. At most one
    /// executor across replicas observes true per pending cycle.
    async fn claim_shell_task(&self, uuid: Uuid) -> StoreResult<bool>;

    /// Append an SCP transfer audit row.
    async fn add_scp_record(&self, rec: ScpRecord) -> StoreResult<()>;

    /// Append a per-host fan-out result row.
    async fn create_shell_task_record(&self, rec: ShellTaskRecord) -> StoreResult<()>;

    /// Append an interactive session audit row.
    async fn record_session(&self, rec: SessionRecord) -> StoreResult<()>;
}

/// One page of discovered instances.
#[derive(Debug, Clone)]
pub struct InstancePage {
    pub instances: Vec<Instance>,
    /// Opaque pagination marker; `None` means the enumeration is exhausted.
    pub next_marker: Option<String>,
}

/// A raw instance as reported by a cloud provider, before inventory
/// normalisation.
#[derive(Debug, Clone)]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Private addresses; the first one becomes the target host.
    pub private_ips: Vec<String>,
    /// Provider platform string, e.g. "Ubuntu 22.04" or "Linux/UNIX".
    pub platform: String,
    /// Key pair names as reported by the provider (mixed case).
    pub key_names: Vec<String>,
    pub status: TargetStatus,
    pub tags: HashMap<String, String>,
}

/// Cloud discovery collaborator.
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Enumerate instances for one profile and region. Callers repeat the
    /// call with the returned marker until it is `None`.
    async fn describe_instances(
        &self,
        profile: &str,
        region: &str,
        next_marker: Option<String>,
    ) -> StoreResult<InstancePage>;
}

/// Directory service collaborator used for downstream password auth.
#[async_trait]
pub trait DirectoryAuth: Send + Sync {
    /// Verify a username/password pair. An `Err` is an authentication
    /// failure; the message stays server-side.
    async fn login(&self, username: &str, password: &str) -> StoreResult<()>;
}

/// Chat notifier collaborator.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a one-line text notification. Failures are the caller's to log.
    async fn send_text(&self, token: &str, text: &str) -> StoreResult<()>;
}
