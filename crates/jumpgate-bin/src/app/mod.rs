//! Daemon assembly: state construction, background loops, server startup.

mod state;

pub use state::{AppState, NullCloudAdapter, StateRunner};

use chrono::Utc;
use fleet_inventory::InventoryCache;
use jumpgate_core::{Config, Paths};
use jumpgate_store::{MemoryDirectory, MemoryStore, WebhookNotifier};
use shell_fanout::{FanoutExecutor, LivenessProber};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Fan-out scheduler tick.
const FANOUT_TICK: Duration = Duration::from_secs(60);

/// Build the dependency container and run until shutdown.
pub async fn run_daemon(config: Config, paths: Paths) -> anyhow::Result<()> {
    paths.ensure_dirs()?;

    // In-process collaborator implementations. Deployments with an external
    // database, directory service, or provider integration swap these here.
    let store = Arc::new(MemoryStore::new());
    for key in &config.keys {
        store.put_key(key.clone()).await;
    }
    let directory = Arc::new(MemoryDirectory::new());
    let notifier = Arc::new(WebhookNotifier::new());

    let cache = Arc::new(InventoryCache::new(
        Arc::new(NullCloudAdapter),
        store.clone(),
        config.profiles.clone(),
    ));

    let state = AppState {
        config: Arc::new(config),
        paths: Arc::new(paths),
        store,
        directory,
        notifier,
        cache,
    };

    // First refresh before accepting sessions, then the background loops.
    state.cache.refresh().await;
    let background = spawn_background(state.clone());

    let server = crate::server::run_ssh_server(state.clone());
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!(error = %e, "SSH server exited");
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    for task in background {
        task.abort();
    }
    info!("jumpgate stopped");
    Ok(())
}

/// Spawn the inventory refresh, fan-out, and liveness loops.
fn spawn_background(state: AppState) -> Vec<JoinHandle<()>> {
    let mut tasks = Vec::new();

    // Inventory refresh.
    {
        let state = state.clone();
        let interval = Duration::from_secs(state.config.refresh_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // the startup refresh already ran
            loop {
                ticker.tick().await;
                state.cache.refresh().await;
            }
        }));
    }

    // Shell fan-out.
    {
        let state = state.clone();
        let executor = FanoutExecutor::new(
            state.store.clone(),
            Arc::new(StateRunner {
                state: state.clone(),
            }),
            state.notifier.clone(),
            state.config.shell_task_webhook_token(),
            state.config.fanout_width,
        );
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FANOUT_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut window_start = Utc::now();
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let snapshot = state.cache.snapshot();
                executor.tick(&snapshot, window_start, now).await;
                window_start = now;
            }
        }));
    }

    // Liveness probing.
    if !state.config.liveness_hosts.is_empty() {
        let state = state.clone();
        let prober = LivenessProber::new(
            Arc::new(StateRunner {
                state: state.clone(),
            }),
            state.notifier.clone(),
            state.config.shell_task_webhook_token(),
        );
        let interval = Duration::from_secs(state.config.liveness_interval_secs);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = state.cache.snapshot();
                prober.probe_all(&snapshot, &state.config.liveness_hosts).await;
            }
        }));
    }

    tasks
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM");
        tokio::select! {
            _ = term.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
