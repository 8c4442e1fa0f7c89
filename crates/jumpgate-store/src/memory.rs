//! In-memory collaborator implementations.
//!
//! `MemoryStore` backs tests and single-node deployments that do not attach
//! an external database. All state lives in RwLock'd maps; the claim
//! operation performs its check-and-set under the write lock so concurrent
//! claimers observe exactly one winner.

use crate::traits::{DirectoryAuth, Notifier, PersistStore};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use jumpgate_core::{
    KeyPair, Policy, ScpRecord, SessionRecord, ShellTask, ShellTaskRecord, TaskStatus, User,
};
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

/// In-memory persistence store.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    policies: RwLock<Vec<Policy>>,
    keys: RwLock<Vec<KeyPair>>,
    tasks: RwLock<HashMap<Uuid, ShellTask>>,
    scp_records: Mutex<Vec<ScpRecord>>,
    task_records: Mutex<Vec<ShellTaskRecord>>,
    session_records: Mutex<Vec<SessionRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_user(&self, user: User) {
        self.users.write().await.insert(user.name.clone(), user);
    }

    pub async fn put_policy(&self, policy: Policy) {
        self.policies.write().await.push(policy);
    }

    pub async fn put_key(&self, key: KeyPair) {
        self.keys.write().await.push(key);
    }

    pub async fn put_task(&self, task: ShellTask) {
        self.tasks.write().await.insert(task.uuid, task);
    }

    /// Snapshot of recorded SCP rows, for assertions.
    pub async fn scp_records(&self) -> Vec<ScpRecord> {
        self.scp_records.lock().await.clone()
    }

    /// Snapshot of recorded per-host fan-out rows, for assertions.
    pub async fn task_records(&self) -> Vec<ShellTaskRecord> {
        self.task_records.lock().await.clone()
    }

    /// Snapshot of recorded session rows, for assertions.
    pub async fn session_records(&self) -> Vec<SessionRecord> {
        self.session_records.lock().await.clone()
    }

    /// Current status of a task, for assertions.
    pub async fn task_status(&self, uuid: Uuid) -> Option<TaskStatus> {
        self.tasks.read().await.get(&uuid).map(|t| t.status)
    }
}

#[async_trait]
impl PersistStore for MemoryStore {
    async fn describe_user(&self, name: &str) -> StoreResult<User> {
        self.users
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("user {name}")))
    }

    async fn query_policy_by_user(&self, name: &str) -> StoreResult<Vec<Policy>> {
        let user = match self.users.read().await.get(name).cloned() {
            Some(user) => user,
            // Unknown users still see wildcard policies.
            None => User {
                name: name.to_string(),
                groups: Default::default(),
                public_keys: Vec::new(),
            },
        };

        Ok(self
            .policies
            .read()
            .await
            .iter()
            .filter(|p| p.matches_subject(&user))
            .cloned()
            .collect())
    }

    async fn internal_load_key(&self) -> StoreResult<Vec<KeyPair>> {
        Ok(self.keys.read().await.clone())
    }

    async fn list_shell_task(&self) -> StoreResult<Vec<ShellTask>> {
        Ok(self.tasks.read().await.values().cloned().collect())
    }

    async fn update_shell_task_status(
        &self,
        uuid: Uuid,
        status: TaskStatus,
        _msg: &str,
    ) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&uuid)
            .ok_or_else(|| StoreError::NotFound(format!("task {uuid}")))?;
        task.status = status;
        if matches!(
            status,
            TaskStatus::Success | TaskStatus::NotAllSuccess | TaskStatus::Failed
        ) {
            task.exec_times += 1;
        }
        Ok(())
    }

    async fn claim_shell_task(&self, uuid: Uuid) -> StoreResult<bool> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&uuid)
            .ok_or_else(|| StoreError::NotFound(format!("task {uuid}")))?;
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        task.status = TaskStatus::Running;
        Ok(true)
    }

    async fn add_scp_record(&self, rec: ScpRecord) -> StoreResult<()> {
        self.scp_records.lock().await.push(rec);
        Ok(())
    }

    async fn create_shell_task_record(&self, rec: ShellTaskRecord) -> StoreResult<()> {
        self.task_records.lock().await.push(rec);
        Ok(())
    }

    async fn record_session(&self, rec: SessionRecord) -> StoreResult<()> {
        self.session_records.lock().await.push(rec);
        Ok(())
    }
}

/// In-memory directory: a username → password map.
#[derive(Default)]
pub struct MemoryDirectory {
    accounts: RwLock<HashMap<String, String>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_account(&self, username: &str, password: &str) {
        self.accounts
            .write()
            .await
            .insert(username.to_string(), password.to_string());
    }
}

#[async_trait]
impl DirectoryAuth for MemoryDirectory {
    async fn login(&self, username: &str, password: &str) -> StoreResult<()> {
        let accounts = self.accounts.read().await;
        match accounts.get(username) {
            None => Err(StoreError::Auth(format!("user {username} not found"))),
            Some(expected) if expected == password => Ok(()),
            Some(_) => Err(StoreError::Auth("invalid password".to_string())),
        }
    }
}

/// Notifier that records sent messages, for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_text(&self, _token: &str, text: &str) -> StoreResult<()> {
        self.sent.lock().await.push(text.to_string());
        Ok(())
    }
}
