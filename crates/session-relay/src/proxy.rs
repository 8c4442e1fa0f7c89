//! Interactive proxy: the bidirectional byte pump between the downstream
//! user terminal and the upstream shell session.
//!
//! The pump is byte-transparent in both directions. Window-size changes are
//! forwarded as they arrive, the upstream output is optionally teed into a
//! session recording, and an idle deadline closes both sides when no byte
//! flows in either direction for the configured interval.

use crate::recording::SessionRecorder;
use crate::{RelayError, RelayResult};
use russh::{client, Channel, ChannelMsg};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

const READ_BUF_SIZE: usize = 32 * 1024;
const IDLE_BANNER: &[u8] = b"\r\njumpgate: session closed (idle timeout)\r\n";

/// A downstream terminal resize event.
#[derive(Debug, Clone, Copy)]
pub struct WindowChange {
    pub cols: u32,
    pub rows: u32,
}

/// Parameters of an interactive session.
#[derive(Debug, Clone)]
pub struct InteractiveConfig {
    /// Terminal type reported downstream, replayed upstream.
    pub term: String,
    pub cols: u32,
    pub rows: u32,
    pub idle_timeout: Duration,
}

/// How the pump ended and how much it moved.
#[derive(Debug, Clone)]
pub struct ProxyOutcome {
    /// Bytes pumped downstream → upstream.
    pub bytes_up: u64,
    /// Bytes pumped upstream → downstream.
    pub bytes_down: u64,
    pub exit_code: Option<u32>,
    pub timed_out: bool,
}

/// Run the interactive proxy until either side closes, errors, or the idle
/// deadline fires.
///
/// The upstream channel gets a PTY with the downstream's terminal type and
/// dimensions, then a shell. The channel is closed on every exit path.
pub async fn run_interactive<DR, DW>(
    mut channel: Channel<client::Msg>,
    mut downstream_read: DR,
    mut downstream_write: DW,
    mut winch_rx: mpsc::Receiver<WindowChange>,
    config: InteractiveConfig,
    mut recorder: Option<&mut SessionRecorder>,
) -> RelayResult<ProxyOutcome>
where
    DR: AsyncRead + Unpin,
    DW: AsyncWrite + Unpin,
{
    channel
        .request_pty(
            false,
            &config.term,
            config.cols,
            config.rows,
            0,
            0,
            &[],
        )
        .await?;
    channel.request_shell(true).await?;

    let mut outcome = ProxyOutcome {
        bytes_up: 0,
        bytes_down: 0,
        exit_code: None,
        timed_out: false,
    };
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut downstream_open = true;
    let mut deadline = Instant::now() + config.idle_timeout;

    let result: RelayResult<()> = loop {
        tokio::select! {
            read = downstream_read.read(&mut buf), if downstream_open => {
                match read {
                    Ok(0) => {
                        // User hung up; tell the upstream shell.
                        downstream_open = false;
                        let _ = channel.eof().await;
                        break Ok(());
                    }
                    Ok(n) => {
                        outcome.bytes_up += n as u64;
                        deadline = Instant::now() + config.idle_timeout;
                        channel.data(&buf[..n]).await?;
                    }
                    Err(e) => break Err(RelayError::Io(e)),
                }
            }
            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        outcome.bytes_down += data.len() as u64;
                        deadline = Instant::now() + config.idle_timeout;
                        downstream_write.write_all(data).await?;
                        downstream_write.flush().await?;
                        if let Some(recorder) = recorder.as_deref_mut() {
                            if let Err(e) = recorder.write(data).await {
                                warn!(error = %e, "Recording write failed, disabling");
                            }
                        }
                    }
                    Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        outcome.bytes_down += data.len() as u64;
                        deadline = Instant::now() + config.idle_timeout;
                        downstream_write.write_all(data).await?;
                        downstream_write.flush().await?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        outcome.exit_code = Some(exit_status);
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        break Ok(());
                    }
                    Some(other) => {
                        debug!(msg = ?other, "Ignoring channel message");
                    }
                }
            }
            Some(winch) = winch_rx.recv() => {
                channel.window_change(winch.cols, winch.rows, 0, 0).await?;
            }
            _ = tokio::time::sleep_until(deadline) => {
                outcome.timed_out = true;
                let _ = downstream_write.write_all(IDLE_BANNER).await;
                let _ = downstream_write.flush().await;
                break Ok(());
            }
        }
    };

    // Closing our side makes the peer's pump wind down within the idle
    // window even when it never sees an EOF.
    let _ = channel.close().await;
    result.map(|_| outcome)
}
