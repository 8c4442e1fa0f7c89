//! The fan-out executor.

use crate::schedule::cron_fires_within;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_inventory::FleetSnapshot;
use futures_util::future::join_all;
use jumpgate_core::{ShellTask, ShellTaskRecord, SshUser, Target, TaskStatus};
use jumpgate_store::{Notifier, PersistStore};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use upstream_dial::{CommandOutput, Dialer};

/// Seam towards the fleet: run a command on one target.
#[async_trait]
pub trait UpstreamRunner: Send + Sync {
    /// Execute `shell` and collect its joined output. The error string is
    /// recorded as the host's output.
    async fn run(
        &self,
        target: &Target,
        ssh_user: &SshUser,
        shell: &str,
    ) -> Result<CommandOutput, String>;

    /// Dial the target and drop the connection; liveness only cares that
    /// the handshake completes.
    async fn probe(&self, target: &Target, ssh_user: &SshUser) -> Result<(), String>;
}

#[async_trait]
impl UpstreamRunner for Dialer {
    async fn run(
        &self,
        target: &Target,
        ssh_user: &SshUser,
        shell: &str,
    ) -> Result<CommandOutput, String> {
        let handle = self
            .dial(target, ssh_user)
            .await
            .map_err(|e| e.to_string())?;
        let result = handle.run_command(shell).await.map_err(|e| e.to_string());
        handle.close().await;
        result
    }

    async fn probe(&self, target: &Target, ssh_user: &SshUser) -> Result<(), String> {
        let handle = self
            .dial(target, ssh_user)
            .await
            .map_err(|e| e.to_string())?;
        handle.close().await;
        Ok(())
    }
}

/// Runs shell tasks across the fleet.
pub struct FanoutExecutor {
    store: Arc<dyn PersistStore>,
    runner: Arc<dyn UpstreamRunner>,
    notifier: Arc<dyn Notifier>,
    webhook_token: Option<String>,
    width: usize,
}

impl FanoutExecutor {
    pub fn new(
        store: Arc<dyn PersistStore>,
        runner: Arc<dyn UpstreamRunner>,
        notifier: Arc<dyn Notifier>,
        webhook_token: Option<String>,
        width: usize,
    ) -> Self {
        Self {
            store,
            runner,
            notifier,
            webhook_token,
            width: width.max(1),
        }
    }

    /// One scheduler tick: promote cron-due tasks, then run everything
    /// pending against the given fleet snapshot.
    pub async fn tick(
        &self,
        snapshot: &FleetSnapshot,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.promote_cron_tasks(window_start, now).await;
        self.run_pending(snapshot).await;
    }

    /// Transition tasks whose cron expression fired inside the window to
    /// `Pending`, unless they are already running.
    pub async fn promote_cron_tasks(&self, window_start: DateTime<Utc>, now: DateTime<Utc>) {
        let tasks = match self.store.list_shell_task().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to list shell tasks");
                return;
            }
        };

        for task in tasks {
            let Some(expr) = task.cron.as_deref().filter(|e| !e.is_empty()) else {
                continue;
            };
            if matches!(task.status, TaskStatus::Running | TaskStatus::Pending) {
                continue;
            }
            if !cron_fires_within(expr, window_start, now) {
                continue;
            }
            if let Err(e) = self
                .store
                .update_shell_task_status(task.uuid, TaskStatus::Pending, "cron schedule matched")
                .await
            {
                error!(task = %task.uuid, error = %e, "Failed to reset task to pending");
            }
        }
    }

    /// Claim and execute every pending task.
    pub async fn run_pending(&self, snapshot: &FleetSnapshot) {
        let tasks = match self.store.list_shell_task().await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Failed to list shell tasks");
                return;
            }
        };

        let pending: Vec<ShellTask> = tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();

        let runs = pending.into_iter().map(|task| async move {
            match self.store.claim_shell_task(task.uuid).await {
                Ok(true) => self.execute_task(&task, snapshot).await,
                Ok(false) => {
                    debug!(task = %task.uuid, "Task claimed elsewhere");
                }
                Err(e) => {
                    error!(task = %task.uuid, error = %e, "Failed to claim task");
                }
            }
        });
        join_all(runs).await;
    }

    /// Run one claimed task across its matching targets and write the
    /// terminal status.
    async fn execute_task(&self, task: &ShellTask, snapshot: &FleetSnapshot) {
        let started = Instant::now();
        info!(task = %task.uuid, name = %task.name, "Shell task started");

        let (status, message) = self.fan_out(task, snapshot).await;

        if let Err(e) = self
            .store
            .update_shell_task_status(task.uuid, status, &message)
            .await
        {
            error!(task = %task.uuid, error = %e, "Failed to write terminal status");
        }

        info!(
            task = %task.uuid,
            status = ?status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Shell task finished"
        );
        self.notify(&format!(
            "shell task {}({}) status:{:?} {}",
            task.name, task.uuid, status, message
        ))
        .await;
    }

    /// Execute the task on every matching target, bounded by the configured
    /// width, and aggregate per-host results.
    async fn fan_out(&self, task: &ShellTask, snapshot: &FleetSnapshot) -> (TaskStatus, String) {
        let targets: Vec<Arc<Target>> = snapshot
            .all()
            .into_iter()
            .filter(|t| t.is_reachable() && task.filter.matches(t))
            .collect();

        if targets.is_empty() {
            return (TaskStatus::Failed, "not found servers".to_string());
        }

        let semaphore = Arc::new(Semaphore::new(self.width));
        let total = targets.len();

        let runs = targets.into_iter().map(|target| {
            let semaphore = semaphore.clone();
            async move {
                // Limits concurrent upstream connections per task.
                let _permit = semaphore.acquire().await;
                let succeeded = self.run_on_host(task, &target).await;
                (target.host.clone(), succeeded)
            }
        });
        let results = join_all(runs).await;

        let failed: Vec<String> = results
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(host, _)| host)
            .collect();

        if failed.is_empty() {
            (TaskStatus::Success, format!("all {total} servers succeeded"))
        } else if failed.len() == total {
            (TaskStatus::Failed, "all servers failed".to_string())
        } else {
            (
                TaskStatus::NotAllSuccess,
                format!("some servers failed: {failed:?}"),
            )
        }
    }

    /// Run the shell on one host and record the per-host row. Returns
    /// whether the command succeeded.
    async fn run_on_host(&self, task: &ShellTask, target: &Target) -> bool {
        let Some(ssh_user) = target.default_ssh_user() else {
            warn!(host = %target.host, "Target has no usable credentials");
            return false;
        };

        let started = Instant::now();
        let (is_success, output) = match self.runner.run(target, ssh_user, &task.shell).await {
            Ok(result) if result.success() => (true, result.output),
            Ok(result) => (false, result.output),
            Err(e) => (false, e),
        };

        if is_success {
            info!(host = %target.host, task = %task.uuid, "Shell succeeded");
        } else {
            warn!(host = %target.host, task = %task.uuid, "Shell failed");
        }

        let record = ShellTaskRecord {
            task_id: task.uuid,
            task_name: task.name.clone(),
            exec_times: task.exec_times + 1,
            server_name: target.name.clone(),
            server_ip: target.host.clone(),
            shell: task.shell.clone(),
            is_success,
            output,
            cost_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.store.create_shell_task_record(record).await {
            error!(task = %task.uuid, error = %e, "Failed to record task result");
        }

        is_success
    }

    /// Fire-and-forget chat notification.
    async fn notify(&self, text: &str) {
        let Some(token) = &self.webhook_token else {
            debug!("No webhook token configured, skipping notification");
            return;
        };
        if let Err(e) = self.notifier.send_text(token, text).await {
            error!(error = %e, "Failed to send notification");
        }
    }
}

#[cfg(test)]
mod tests;
