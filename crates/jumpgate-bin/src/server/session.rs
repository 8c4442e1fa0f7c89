//! Session tasks: everything that happens on a channel after `shell` or
//! `exec` is accepted.
//!
//! Each task owns its end of the channel pipe. On every exit path the
//! downstream channel gets an exit status, EOF, and close; panics are
//! caught at the task root and logged without taking the server down.

use crate::app::AppState;
use chrono::Utc;
use jumpgate_core::{SessionRecord, User};
use jumpgate_store::StoreError;
use russh::server::Handle;
use russh::ChannelId;
use session_relay::{
    handle_download, handle_upload, read_line_echo, resolve_direct, run_interactive,
    InteractiveConfig, MenuAction, RelayError, ScpContext, SessionRecorder, TargetMenu,
    WindowChange,
};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Downstream PTY parameters replayed to the upstream.
#[derive(Debug, Clone)]
pub struct PtyInfo {
    pub term: String,
    pub cols: u32,
    pub rows: u32,
}

impl Default for PtyInfo {
    fn default() -> Self {
        Self {
            term: "xterm".to_string(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Direction of an accepted scp exec request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScpMode {
    /// `scp -t`: the client pushes a file through us.
    Upload,
    /// `scp -f`: the client pulls a file through us.
    Download,
}

/// Parse an exec command against the only accepted shape:
/// `scp -t|-f <path>`.
pub fn parse_scp_command(command: &str) -> Option<(ScpMode, String)> {
    let rest = command.trim().strip_prefix("scp ")?;
    let (flag, path) = rest.split_once(' ')?;
    let mode = match flag {
        "-t" => ScpMode::Upload,
        "-f" => ScpMode::Download,
        _ => return None,
    };
    let path = path.trim();
    if path.is_empty() || path.starts_with('-') {
        return None;
    }
    Some((mode, path.to_string()))
}

/// Spawn a task and demote its panic, if any, to a logged internal error.
fn spawn_contained<F>(what: &'static str, future: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(future);
    tokio::spawn(async move {
        if let Err(e) = task.await {
            if e.is_panic() {
                error!(task = what, "Session task panicked");
            }
        }
    });
}

/// Close the downstream channel with an exit status.
async fn finish_channel(handle: &Handle, id: ChannelId, exit_status: u32) {
    let _ = handle.exit_status_request(id, exit_status).await;
    let _ = handle.eof(id).await;
    let _ = handle.close(id).await;
}

/// Look up the directory user backing a session.
async fn session_user(state: &AppState, username: &str) -> Result<User, StoreError> {
    match state.store.describe_user(username).await {
        Ok(user) => Ok(user),
        // Directory-authenticated users without a store row still get
        // wildcard policies.
        Err(StoreError::NotFound(_)) => Ok(User {
            name: username.to_string(),
            groups: Default::default(),
            public_keys: Vec::new(),
        }),
        Err(e) => Err(e),
    }
}

/// Spawn the interactive flow: menu, dial, proxy, audit.
#[allow(clippy::too_many_arguments)]
pub fn spawn_shell_session(
    state: AppState,
    username: String,
    client_addr: String,
    pty: PtyInfo,
    io: DuplexStream,
    winch_rx: mpsc::Receiver<WindowChange>,
    handle: Handle,
    id: ChannelId,
) {
    spawn_contained("shell", async move {
        let status =
            match run_shell_session(state, username, client_addr, pty, io, winch_rx).await {
                Ok(()) => 0,
                Err(e) => {
                    info!(error = %e, "Shell session ended with error");
                    1
                }
            };
        finish_channel(&handle, id, status).await;
    });
}

async fn run_shell_session(
    state: AppState,
    username: String,
    client_addr: String,
    pty: PtyInfo,
    io: DuplexStream,
    winch_rx: mpsc::Receiver<WindowChange>,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = tokio::io::split(io);

    let user = session_user(&state, &username).await?;
    let policies = state.store.query_policy_by_user(&user.name).await?;
    let snapshot = state.cache.snapshot();

    let mut menu = TargetMenu::new(&snapshot, &policies, &user, Utc::now());
    writer
        .write_all(format!("\r\njumpgate: {} target(s) available\r\n\r\n", menu.len()).as_bytes())
        .await?;
    writer.write_all(menu.render().as_bytes()).await?;
    writer.flush().await?;

    let (target, ssh_user) = loop {
        writer.write_all(b"> ").await?;
        writer.flush().await?;
        let Some(line) = read_line_echo(&mut reader, &mut writer).await? else {
            return Ok(());
        };
        match menu.handle_input(&line) {
            MenuAction::Selected(target, ssh_user) => break (target, ssh_user),
            MenuAction::Quit => return Ok(()),
            MenuAction::Redraw => {
                writer.write_all(menu.render().as_bytes()).await?;
                writer.flush().await?;
            }
            MenuAction::Invalid(reason) => {
                // A non-numeric entry may be a direct host or name.
                match resolve_direct(&snapshot, &policies, &user, &line, Utc::now()) {
                    Ok((target, ssh_user)) => break (target, ssh_user),
                    Err(RelayError::TargetNotFound(_)) => {
                        writer.write_all(format!("{reason}\r\n").as_bytes()).await?;
                    }
                    Err(e) => {
                        writer
                            .write_all(format!("{}\r\n", e.user_message()).as_bytes())
                            .await?;
                    }
                }
                writer.flush().await?;
            }
        }
    };

    info!(
        user = %user.name,
        target = %target.name,
        ssh_user = %ssh_user.username,
        "Connecting"
    );
    writer
        .write_all(format!("connecting to {} ({})...\r\n", target.name, target.host).as_bytes())
        .await?;
    writer.flush().await?;

    let dialer = state.dialer().await;
    let upstream = match dialer.dial(&target, &ssh_user).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!(target = %target.host, error = %e, "Upstream dial failed");
            writer
                .write_all(format!("connection failed: {e}\r\n").as_bytes())
                .await?;
            writer.flush().await?;
            return Ok(());
        }
    };
    let channel = upstream.open_session().await?;

    let session_id = Uuid::new_v4();
    let start_time = Utc::now();
    let mut recorder = match &state.config.recording_dir {
        Some(dir) => Some(SessionRecorder::create(dir, session_id).await?),
        None => None,
    };

    let outcome = run_interactive(
        channel,
        reader,
        writer,
        winch_rx,
        InteractiveConfig {
            term: pty.term,
            cols: pty.cols,
            rows: pty.rows,
            idle_timeout: Duration::from_secs(state.config.idle_timeout_secs),
        },
        recorder.as_mut(),
    )
    .await;
    upstream.close().await;

    let recording = match recorder {
        Some(recorder) => Some(recorder.finish().await?),
        None => None,
    };

    match &outcome {
        Ok(outcome) => info!(
            session = %session_id,
            bytes_up = outcome.bytes_up,
            bytes_down = outcome.bytes_down,
            timed_out = outcome.timed_out,
            "Session closed"
        ),
        Err(e) => warn!(session = %session_id, error = %e, "Session failed"),
    }

    let record = SessionRecord {
        id: session_id,
        user: user.name.clone(),
        client_addr,
        target: target.name.clone(),
        ssh_user: ssh_user.username.clone(),
        start_time,
        end_time: Some(Utc::now()),
        recording,
    };
    if let Err(e) = state.store.record_session(record).await {
        error!(session = %session_id, error = %e, "Failed to record session");
    }

    outcome.map(|_| ()).map_err(Into::into)
}

/// Spawn the SCP flow for an accepted `scp -t|-f` exec request.
#[allow(clippy::too_many_arguments)]
pub fn spawn_scp_session(
    state: AppState,
    username: String,
    client_addr: String,
    mode: ScpMode,
    path: String,
    io: DuplexStream,
    handle: Handle,
    id: ChannelId,
) {
    spawn_contained("scp", async move {
        let status = match run_scp_session(state, username, client_addr, mode, path, io).await {
            Ok(()) => 0,
            Err(e) => {
                info!(error = %e, "SCP session ended with error");
                1
            }
        };
        finish_channel(&handle, id, status).await;
    });
}

async fn run_scp_session(
    state: AppState,
    username: String,
    client_addr: String,
    mode: ScpMode,
    path: String,
    io: DuplexStream,
) -> anyhow::Result<()> {
    let (mut reader, mut writer) = tokio::io::split(io);

    let user = session_user(&state, &username).await?;
    let policies = state.store.query_policy_by_user(&user.name).await?;
    let snapshot = state.cache.snapshot();
    let dialer = state.dialer().await;

    let ctx = ScpContext {
        user: &user,
        client_addr,
        policies: &policies,
        store: state.store.clone(),
        spool_dir: state.spool_dir(),
    };

    match mode {
        ScpMode::Upload => {
            handle_upload(&ctx, &snapshot, &path, &mut reader, &mut writer, &dialer).await?
        }
        ScpMode::Download => {
            handle_download(&ctx, &snapshot, &path, &mut reader, &mut writer, &dialer).await?
        }
    }
    Ok(())
}
