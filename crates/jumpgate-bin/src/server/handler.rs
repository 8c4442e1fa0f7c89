//! Per-connection SSH handler.
//!
//! Accepted requests: `pty-req`, `shell`, `window-change`, and `exec`
//! restricted to `scp -t|-f <path>`. Everything else fails at the channel
//! level. Client bytes are piped into the session task through an in-memory
//! duplex; the task's output is forwarded back through the server handle.

use crate::app::AppState;
use crate::server::session::{self, PtyInfo, ScpMode};
use jumpgate_store::StoreError;
use russh::keys::{HashAlg, PublicKey};
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use session_relay::WindowChange;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SESSION_PIPE_CAPACITY: usize = 64 * 1024;
const WINCH_QUEUE: usize = 8;

/// Plumbing for one open channel.
struct ChannelPlumbing {
    /// Keeps the channel object alive for the lifetime of the session.
    _channel: Channel<Msg>,
    /// Client bytes flow into here, the session task reads the other end.
    input: Option<WriteHalf<DuplexStream>>,
    /// Given to the session task when shell/exec starts.
    task_io: Option<DuplexStream>,
    winch_tx: mpsc::Sender<WindowChange>,
    winch_rx: Option<mpsc::Receiver<WindowChange>>,
    pty: Option<PtyInfo>,
    started: bool,
}

/// One handler per downstream connection.
pub struct SessionHandler {
    state: AppState,
    peer: Option<SocketAddr>,
    username: Option<String>,
    channels: HashMap<ChannelId, ChannelPlumbing>,
}

impl SessionHandler {
    pub fn new(state: AppState, peer: Option<SocketAddr>) -> Self {
        Self {
            state,
            peer,
            username: None,
            channels: HashMap::new(),
        }
    }

    fn client_addr(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn authenticated_user(&self) -> anyhow::Result<String> {
        self.username
            .clone()
            .ok_or_else(|| anyhow::anyhow!("request before authentication"))
    }
}

/// Forward session task output to the downstream channel.
fn spawn_output_forwarder(
    mut reader: ReadHalf<DuplexStream>,
    handle: russh::server::Handle,
    id: ChannelId,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; SESSION_PIPE_CAPACITY];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if handle.data(id, CryptoVec::from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

impl Handler for SessionHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        match self.state.directory.login(user, password).await {
            Ok(()) => {
                info!(user = %user, client = %self.client_addr(), "Password auth succeeded");
                self.username = Some(user.to_string());
                Ok(Auth::Accept)
            }
            Err(e) => {
                // The reason stays server-side.
                info!(user = %user, client = %self.client_addr(), error = %e, "Password auth failed");
                Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                })
            }
        }
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let record = match self.state.store.describe_user(user).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                info!(user = %user, "Public key auth for unknown user");
                return Ok(Auth::Reject {
                    proceed_with_methods: None,
                    partial_success: false,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let offered = public_key.fingerprint(HashAlg::Sha256);
        let matched = record.public_keys.iter().any(|line| {
            PublicKey::from_openssh(line)
                .map(|k| k.fingerprint(HashAlg::Sha256) == offered)
                .unwrap_or(false)
        });

        if matched {
            info!(user = %user, client = %self.client_addr(), "Public key auth succeeded");
            self.username = Some(user.to_string());
            Ok(Auth::Accept)
        } else {
            info!(user = %user, client = %self.client_addr(), "Public key not registered");
            Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let id = channel.id();
        let (handler_side, task_side) = tokio::io::duplex(SESSION_PIPE_CAPACITY);
        let (reader, writer) = tokio::io::split(handler_side);
        spawn_output_forwarder(reader, session.handle(), id);

        let (winch_tx, winch_rx) = mpsc::channel(WINCH_QUEUE);
        self.channels.insert(
            id,
            ChannelPlumbing {
                _channel: channel,
                input: Some(writer),
                task_io: Some(task_side),
                winch_tx,
                winch_rx: Some(winch_rx),
                pty: None,
                started: false,
            },
        );
        debug!(channel = ?id, "Session channel opened");
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(plumbing) = self.channels.get_mut(&channel) {
            plumbing.pty = Some(PtyInfo {
                term: term.to_string(),
                cols: col_width,
                rows: row_height,
            });
            session.channel_success(channel)?;
        } else {
            session.channel_failure(channel)?;
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let username = self.authenticated_user()?;
        let Some(plumbing) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        if plumbing.started {
            session.channel_failure(channel)?;
            return Ok(());
        }

        let (Some(io), Some(winch_rx)) = (plumbing.task_io.take(), plumbing.winch_rx.take())
        else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        plumbing.started = true;
        let pty = plumbing.pty.clone().unwrap_or_default();

        session::spawn_shell_session(
            self.state.clone(),
            username,
            self.client_addr(),
            pty,
            io,
            winch_rx,
            session.handle(),
            channel,
        );
        session.channel_success(channel)?;
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let username = self.authenticated_user()?;
        let command = String::from_utf8_lossy(data).into_owned();

        let Some((mode, path)) = session::parse_scp_command(&command) else {
            warn!(command = %command, "Rejecting exec request");
            session.channel_failure(channel)?;
            return Ok(());
        };

        let Some(plumbing) = self.channels.get_mut(&channel) else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        let Some(io) = plumbing.task_io.take() else {
            session.channel_failure(channel)?;
            return Ok(());
        };
        plumbing.started = true;

        info!(
            user = %username,
            mode = ?mode,
            path = %path,
            "SCP session starting"
        );
        session::spawn_scp_session(
            self.state.clone(),
            username,
            self.client_addr(),
            mode,
            path,
            io,
            session.handle(),
            channel,
        );
        session.channel_success(channel)?;
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        // No SFTP, no custom subsystems.
        warn!(subsystem = %name, "Rejecting subsystem request");
        session.channel_failure(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(plumbing) = self.channels.get(&channel) {
            let _ = plumbing.winch_tx.try_send(WindowChange {
                cols: col_width,
                rows: row_height,
            });
        }
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(plumbing) = self.channels.get_mut(&channel) {
            if let Some(input) = plumbing.input.as_mut() {
                if input.write_all(data).await.is_err() {
                    // The session task is gone; drop the pipe.
                    plumbing.input = None;
                }
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(plumbing) = self.channels.get_mut(&channel) {
            if let Some(mut input) = plumbing.input.take() {
                let _ = input.shutdown().await;
            }
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        debug!(channel = ?channel, "Channel closed");
        Ok(())
    }
}
