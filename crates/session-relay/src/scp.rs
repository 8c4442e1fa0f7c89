//! SCP relay.
//!
//! The bastion sits in the middle of the SCP conversation: towards the
//! downstream client it plays the remote end, towards the target it plays
//! the client. Permissions are evaluated per request, payloads are staged
//! through a spool file so the advertised size is validated before any byte
//! reaches the peer, and every completed transfer leaves an audit row.
//!
//! Within one transfer all writes towards a peer happen from this task in
//! control-line, payload, end-of-file-marker order; ACKs are read between
//! steps, so the streams never interleave.

use crate::menu::{resolve_scp_destination, ScpDestination};
use crate::{RelayError, RelayResult};
use access_policy::{evaluate, Decision};
use async_trait::async_trait;
use chrono::Utc;
use fleet_inventory::FleetSnapshot;
use jumpgate_core::{Action, Policy, ScpDirection, ScpRecord, SshUser, Target, User};
use jumpgate_store::PersistStore;
use scp_wire::{
    read_ack, read_source_record, write_fatal, write_ok, ControlRecord, ScpError, SourceRecord,
    SpoolFile,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{error, info, warn};

const FOLDER_TRANSFER_MSG: &str =
    "folder transfer is not yet supported, compress the folder and try again";

/// Byte streams of a started remote scp command. The guard keeps the
/// upstream connection alive for the duration of the transfer.
pub struct ScpStreams {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub guard: Option<Box<dyn std::any::Any + Send>>,
}

/// Seam towards the upstream: dial the target and start the remote scp.
#[async_trait]
pub trait UpstreamScp: Send + Sync {
    async fn start_scp(
        &self,
        target: &Target,
        ssh_user: &SshUser,
        command: &str,
    ) -> RelayResult<ScpStreams>;
}

#[async_trait]
impl UpstreamScp for upstream_dial::Dialer {
    async fn start_scp(
        &self,
        target: &Target,
        ssh_user: &SshUser,
        command: &str,
    ) -> RelayResult<ScpStreams> {
        let handle = self.dial(target, ssh_user).await?;
        let channel = handle.open_session().await?;
        channel.exec(true, command).await?;
        let (reader, writer) = tokio::io::split(channel.into_stream());
        Ok(ScpStreams {
            reader: Box::new(reader),
            writer: Box::new(writer),
            guard: Some(Box::new(handle)),
        })
    }
}

/// Everything an SCP request needs from the surrounding session.
pub struct ScpContext<'a> {
    pub user: &'a User,
    pub client_addr: String,
    pub policies: &'a [Policy],
    pub store: Arc<dyn PersistStore>,
    /// Spool directory: the recording dir, or /tmp when unset.
    pub spool_dir: PathBuf,
}

impl ScpContext<'_> {
    fn check(&self, target: &Target, action: Action, raw: &str) -> RelayResult<()> {
        match evaluate(self.policies, self.user, target, action, Utc::now()) {
            Decision::Allowed { .. } => Ok(()),
            decision => {
                info!(
                    user = %self.user.name,
                    target = %target.name,
                    action = ?action,
                    rule = decision.rule().unwrap_or("default"),
                    "SCP request denied"
                );
                Err(RelayError::PolicyDenied {
                    action: format!("{action:?}").to_lowercase(),
                    target: raw.to_string(),
                })
            }
        }
    }

    /// Audit writes never fail the transfer.
    async fn audit(&self, rec: ScpRecord) {
        if let Err(e) = self.store.add_scp_record(rec).await {
            error!(error = %e, "Failed to record SCP audit row");
        }
    }
}

/// Relay a downstream `scp -t <destination>` (upload).
///
/// On any failure the downstream originator receives a fatal ACK with a
/// single-line reason before the error propagates.
pub async fn handle_upload<DR, DW>(
    ctx: &ScpContext<'_>,
    snapshot: &FleetSnapshot,
    raw_destination: &str,
    downstream_read: &mut DR,
    downstream_write: &mut DW,
    connector: &dyn UpstreamScp,
) -> RelayResult<()>
where
    DR: AsyncRead + Send + Unpin,
    DW: AsyncWrite + Send + Unpin,
{
    match upload_inner(
        ctx,
        snapshot,
        raw_destination,
        downstream_read,
        downstream_write,
        connector,
    )
    .await
    {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = write_fatal(downstream_write, &e.user_message()).await;
            Err(e)
        }
    }
}

async fn upload_inner<DR, DW>(
    ctx: &ScpContext<'_>,
    snapshot: &FleetSnapshot,
    raw_destination: &str,
    downstream_read: &mut DR,
    downstream_write: &mut DW,
    connector: &dyn UpstreamScp,
) -> RelayResult<()>
where
    DR: AsyncRead + Send + Unpin,
    DW: AsyncWrite + Send + Unpin,
{
    let dest = resolve_scp_destination(snapshot, raw_destination)?;
    ctx.check(&dest.target, Action::Upload, raw_destination)?;

    // Ready for the client's control records.
    write_ok(downstream_write).await?;

    let mut times: Option<ControlRecord> = None;
    let (perm, size, name) = loop {
        match ControlRecord::read(downstream_read).await? {
            record @ ControlRecord::Time { .. } => {
                times = Some(record);
                write_ok(downstream_write).await?;
            }
            ControlRecord::File { perm, size, name } => break (perm, size, name),
            ControlRecord::DirStart { .. } | ControlRecord::DirEnd => {
                return Err(RelayError::Scp(ScpError::Protocol(
                    FOLDER_TRANSFER_MSG.to_string(),
                )));
            }
        }
    };

    // Ack the file record, then stage the payload before the target is
    // dialed: an undersized or oversized stream never reaches it.
    write_ok(downstream_write).await?;
    let spool = SpoolFile::spool(downstream_read, size, &ctx.spool_dir).await?;

    let ScpStreams {
        mut reader,
        mut writer,
        guard: _guard,
    } = connector
        .start_scp(
            &dest.target,
            &dest.ssh_user,
            &format!("scp -t {}", dest.remote_path),
        )
        .await?;

    read_ack(&mut reader).await?.into_result()?;

    if let Some(times) = &times {
        writer.write_all(times.encode().as_bytes()).await?;
        writer.flush().await?;
        read_ack(&mut reader).await?.into_result()?;
    }

    let record = ControlRecord::File {
        perm,
        size,
        name: name.clone(),
    };
    writer.write_all(record.encode().as_bytes()).await?;
    writer.flush().await?;
    read_ack(&mut reader).await?.into_result()?;

    let mut payload = spool.open_reader().await?;
    tokio::io::copy(&mut payload, &mut writer)
        .await
        .map_err(RelayError::Io)?;
    writer.write_all(&[0x00]).await?;
    writer.flush().await?;
    read_ack(&mut reader).await?.into_result()?;

    // The client gets its final go-ahead only after the target confirmed.
    write_ok(downstream_write).await?;

    info!(
        user = %ctx.user.name,
        file = %name,
        destination = %raw_destination,
        bytes = size,
        "Upload relayed"
    );
    ctx.audit(ScpRecord {
        action: ScpDirection::Upload,
        from: name,
        to: raw_destination.to_string(),
        user: ctx.user.name.clone(),
        client_addr: ctx.client_addr.clone(),
        byte_count: size,
        at: Utc::now(),
    })
    .await;

    Ok(())
}

/// Relay a downstream `scp -f <source>` (download).
pub async fn handle_download<DR, DW>(
    ctx: &ScpContext<'_>,
    snapshot: &FleetSnapshot,
    raw_source: &str,
    downstream_read: &mut DR,
    downstream_write: &mut DW,
    connector: &dyn UpstreamScp,
) -> RelayResult<()>
where
    DR: AsyncRead + Send + Unpin,
    DW: AsyncWrite + Send + Unpin,
{
    match download_inner(
        ctx,
        snapshot,
        raw_source,
        downstream_read,
        downstream_write,
        connector,
    )
    .await
    {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = write_fatal(downstream_write, &e.user_message()).await;
            Err(e)
        }
    }
}

async fn download_inner<DR, DW>(
    ctx: &ScpContext<'_>,
    snapshot: &FleetSnapshot,
    raw_source: &str,
    downstream_read: &mut DR,
    downstream_write: &mut DW,
    connector: &dyn UpstreamScp,
) -> RelayResult<()>
where
    DR: AsyncRead + Send + Unpin,
    DW: AsyncWrite + Send + Unpin,
{
    let ScpDestination {
        target,
        ssh_user,
        remote_path,
    } = resolve_scp_destination(snapshot, raw_source)?;
    ctx.check(&target, Action::Download, raw_source)?;

    let ScpStreams {
        mut reader,
        mut writer,
        guard: _guard,
    } = connector
        .start_scp(&target, &ssh_user, &format!("scp -f {remote_path}"))
        .await?;

    // Kick the source.
    write_ok(&mut writer).await?;

    let mut times: Option<ControlRecord> = None;
    let (perm, size, name) = loop {
        match read_source_record(&mut reader).await? {
            SourceRecord::Failure(ack) => {
                return Err(RelayError::Scp(match ack.into_result() {
                    Err(e) => e,
                    Ok(()) => ScpError::Protocol("unexpected empty failure".to_string()),
                }));
            }
            SourceRecord::Control(record @ ControlRecord::Time { .. }) => {
                times = Some(record);
                write_ok(&mut writer).await?;
            }
            SourceRecord::Control(ControlRecord::File { perm, size, name }) => {
                break (perm, size, name)
            }
            SourceRecord::Control(ControlRecord::DirStart { .. })
            | SourceRecord::Control(ControlRecord::DirEnd) => {
                return Err(RelayError::Scp(ScpError::Protocol(
                    FOLDER_TRANSFER_MSG.to_string(),
                )));
            }
        }
    };

    // Ack the record and stage the payload fully before touching the
    // downstream, so a lying source never reaches the client.
    write_ok(&mut writer).await?;
    let spool = SpoolFile::spool(&mut reader, size, &ctx.spool_dir).await?;

    // The downstream sink sent its go-ahead when the transfer started.
    read_ack(downstream_read).await?.into_result()?;

    if let Some(times) = &times {
        downstream_write
            .write_all(times.encode().as_bytes())
            .await?;
        downstream_write.flush().await?;
        read_ack(downstream_read).await?.into_result()?;
    }

    let record = ControlRecord::File {
        perm,
        size,
        name: name.clone(),
    };
    downstream_write
        .write_all(record.encode().as_bytes())
        .await?;
    downstream_write.flush().await?;
    read_ack(downstream_read).await?.into_result()?;

    let mut payload = spool.open_reader().await?;
    tokio::io::copy(&mut payload, downstream_write)
        .await
        .map_err(RelayError::Io)?;
    downstream_write.write_all(&[0x00]).await?;
    downstream_write.flush().await?;
    read_ack(downstream_read).await?.into_result()?;

    info!(
        user = %ctx.user.name,
        file = %name,
        source = %raw_source,
        bytes = size,
        "Download relayed"
    );
    ctx.audit(ScpRecord {
        action: ScpDirection::Download,
        from: raw_source.to_string(),
        to: name,
        user: ctx.user.name.clone(),
        client_addr: ctx.client_addr.clone(),
        byte_count: size,
        at: Utc::now(),
    })
    .await;

    // Source already signalled completion through its last record; a
    // stubborn one is cut off when the streams drop.
    if let Err(e) = writer.shutdown().await {
        warn!(error = %e, "Upstream shutdown after download failed");
    }

    Ok(())
}
