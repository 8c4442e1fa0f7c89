use super::*;
use crate::liveness::LivenessProber;
use jumpgate_core::{ServerFilter, SshUser, TargetStatus};
use jumpgate_store::{MemoryStore, RecordingNotifier};
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

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

fn staging_snapshot(hosts: &[&str]) -> FleetSnapshot {
    FleetSnapshot::new(
        hosts
            .iter()
            .enumerate()
            .map(|(i, host)| target(&format!("i-{i}"), host, "staging"))
            .collect(),
        HashSet::new(),
    )
}

fn staging_task(shell: &str, cron: Option<&str>, status: TaskStatus) -> ShellTask {
    ShellTask {
        uuid: Uuid::new_v4(),
        name: "echo-task".into(),
        shell: shell.into(),
        filter: ServerFilter {
            tags: Some([("env".to_string(), "staging".to_string())].into()),
            ..Default::default()
        },
        cron: cron.map(|c| c.to_string()),
        exec_times: 0,
        status,
    }
}

/// Scripted runner: per-host success flag, everything else fails.
struct ScriptedRunner {
    outcomes: Mutex<HashMap<String, bool>>,
    probes: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new(outcomes: &[(&str, bool)]) -> Self {
        Self {
            outcomes: Mutex::new(
                outcomes
                    .iter()
                    .map(|(h, ok)| (h.to_string(), *ok))
                    .collect(),
            ),
            probes: Mutex::new(Vec::new()),
        }
    }

    async fn set_outcome(&self, host: &str, ok: bool) {
        self.outcomes.lock().await.insert(host.to_string(), ok);
    }
}

#[async_trait]
impl UpstreamRunner for ScriptedRunner {
    async fn run(
        &self,
        target: &Target,
        _ssh_user: &SshUser,
        _shell: &str,
    ) -> Result<CommandOutput, String> {
        match self.outcomes.lock().await.get(&target.host) {
            Some(true) => Ok(CommandOutput {
                output: "ok\n".into(),
                exit_code: 0,
            }),
            Some(false) => Err("dial error: connection refused".into()),
            None => Err("unexpected host".into()),
        }
    }

    async fn probe(&self, target: &Target, _ssh_user: &SshUser) -> Result<(), String> {
        self.probes.lock().await.push(target.host.clone());
        match self.outcomes.lock().await.get(&target.host) {
            Some(true) => Ok(()),
            _ => Err("connection refused".into()),
        }
    }
}

fn executor(store: Arc<MemoryStore>, runner: ScriptedRunner) -> (FanoutExecutor, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::new());
    let executor = FanoutExecutor::new(
        store,
        Arc::new(runner),
        notifier.clone(),
        Some("test-token".into()),
        64,
    );
    (executor, notifier)
}

#[tokio::test]
async fn test_all_hosts_succeed_yields_success() {
    let store = Arc::new(MemoryStore::new());
    let task = staging_task("echo ok", None, TaskStatus::Pending);
    let uuid = task.uuid;
    store.put_task(task).await;

    let snapshot = staging_snapshot(&["10.0.0.1", "10.0.0.2"]);
    let (executor, notifier) =
        executor(store.clone(), ScriptedRunner::new(&[("10.0.0.1", true), ("10.0.0.2", true)]));

    executor.run_pending(&snapshot).await;

    assert_eq!(store.task_status(uuid).await, Some(TaskStatus::Success));

    let records = store.task_records().await;
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.is_success));
    assert!(records.iter().all(|r| r.output == "ok\n"));
    assert!(records.iter().all(|r| r.exec_times == 1));

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains("Success"));
}

#[tokio::test]
async fn test_one_failing_host_yields_not_all_success() {
    let store = Arc::new(MemoryStore::new());
    let task = staging_task("echo ok", None, TaskStatus::Pending);
    let uuid = task.uuid;
    store.put_task(task).await;

    let snapshot = staging_snapshot(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    let (executor, _notifier) = executor(
        store.clone(),
        ScriptedRunner::new(&[
            ("10.0.0.1", true),
            ("10.0.0.2", false),
            ("10.0.0.3", true),
        ]),
    );

    executor.run_pending(&snapshot).await;

    assert_eq!(
        store.task_status(uuid).await,
        Some(TaskStatus::NotAllSuccess)
    );
    let records = store.task_records().await;
    let failed: Vec<_> = records.iter().filter(|r| !r.is_success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].server_ip, "10.0.0.2");
}

#[tokio::test]
async fn test_no_matching_hosts_yields_failed() {
    let store = Arc::new(MemoryStore::new());
    let task = staging_task("echo ok", None, TaskStatus::Pending);
    let uuid = task.uuid;
    store.put_task(task).await;

    // Fleet has only prod hosts; the staging filter matches nothing.
    let snapshot = FleetSnapshot::new(vec![target("i-9", "10.0.9.9", "prod")], HashSet::new());
    let (executor, notifier) = executor(store.clone(), ScriptedRunner::new(&[]));

    executor.run_pending(&snapshot).await;

    assert_eq!(store.task_status(uuid).await, Some(TaskStatus::Failed));
    assert!(store.task_records().await.is_empty());
    assert!(notifier.sent().await[0].contains("not found servers"));
}

#[tokio::test]
async fn test_all_hosts_failing_yields_failed() {
    let store = Arc::new(MemoryStore::new());
    let task = staging_task("echo ok", None, TaskStatus::Pending);
    let uuid = task.uuid;
    store.put_task(task).await;

    let snapshot = staging_snapshot(&["10.0.0.1", "10.0.0.2"]);
    let (executor, _notifier) = executor(
        store.clone(),
        ScriptedRunner::new(&[("10.0.0.1", false), ("10.0.0.2", false)]),
    );

    executor.run_pending(&snapshot).await;
    assert_eq!(store.task_status(uuid).await, Some(TaskStatus::Failed));
}

#[tokio::test]
async fn test_non_pending_tasks_are_not_run() {
    let store = Arc::new(MemoryStore::new());
    let task = staging_task("echo ok", None, TaskStatus::Draft);
    let uuid = task.uuid;
    store.put_task(task).await;

    let snapshot = staging_snapshot(&["10.0.0.1"]);
    let (executor, notifier) = executor(store.clone(), ScriptedRunner::new(&[("10.0.0.1", true)]));

    executor.run_pending(&snapshot).await;
    assert_eq!(store.task_status(uuid).await, Some(TaskStatus::Draft));
    assert!(notifier.sent().await.is_empty());
}

#[tokio::test]
async fn test_cron_promotion_respects_window_and_running_state() {
    let store = Arc::new(MemoryStore::new());
    let due = staging_task("echo ok", Some("0 */5 * * * *"), TaskStatus::Success);
    let due_uuid = due.uuid;
    let running = staging_task("echo ok", Some("0 */5 * * * *"), TaskStatus::Running);
    let running_uuid = running.uuid;
    let manual = staging_task("echo ok", None, TaskStatus::Success);
    let manual_uuid = manual.uuid;
    store.put_task(due).await;
    store.put_task(running).await;
    store.put_task(manual).await;

    let (executor, _notifier) = executor(store.clone(), ScriptedRunner::new(&[]));

    use chrono::TimeZone;
    let window_start = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 4, 30).unwrap();
    let now = chrono::Utc.with_ymd_and_hms(2024, 3, 1, 12, 5, 0).unwrap();
    executor.promote_cron_tasks(window_start, now).await;

    assert_eq!(store.task_status(due_uuid).await, Some(TaskStatus::Pending));
    assert_eq!(
        store.task_status(running_uuid).await,
        Some(TaskStatus::Running)
    );
    assert_eq!(
        store.task_status(manual_uuid).await,
        Some(TaskStatus::Success)
    );
}

#[tokio::test]
async fn test_liveness_alarm_raised_once_and_recovery_notified() {
    let notifier = Arc::new(RecordingNotifier::new());
    let snapshot = staging_snapshot(&["10.0.0.1"]);
    let hosts = vec!["10.0.0.1".to_string()];

    let runner = Arc::new(ScriptedRunner::new(&[("10.0.0.1", false)]));
    let prober = LivenessProber::new(runner.clone(), notifier.clone(), Some("tok".into()));

    // First failure alarms once; the repeat stays silent.
    prober.probe_all(&snapshot, &hosts).await;
    prober.probe_all(&snapshot, &hosts).await;
    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 1, "repeat failures must not re-notify");
    assert!(sent[0].contains("failed"));

    // The host comes back: one recovery notice, alarm cleared.
    runner.set_outcome("10.0.0.1", true).await;
    prober.probe_all(&snapshot, &hosts).await;
    prober.probe_all(&snapshot, &hosts).await;

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[1].contains("recovered"));

    // A fresh outage alarms again.
    runner.set_outcome("10.0.0.1", false).await;
    prober.probe_all(&snapshot, &hosts).await;
    assert_eq!(notifier.sent().await.len(), 3);
}

#[tokio::test]
async fn test_liveness_unknown_host_notifies_every_round() {
    let notifier = Arc::new(RecordingNotifier::new());
    let snapshot = staging_snapshot(&[]);
    let hosts = vec!["10.9.9.9".to_string()];

    let runner = Arc::new(ScriptedRunner::new(&[]));
    let prober = LivenessProber::new(runner, notifier.clone(), Some("tok".into()));
    prober.probe_all(&snapshot, &hosts).await;
    prober.probe_all(&snapshot, &hosts).await;

    let sent = notifier.sent().await;
    assert_eq!(sent.len(), 2);
    assert!(sent[0].contains("not found"));
}
