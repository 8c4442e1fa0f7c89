//! The downstream SSH server.

mod handler;
mod session;

use crate::app::AppState;
use anyhow::Context;
use handler::SessionHandler;
use russh::keys::{Algorithm, PrivateKey};
use russh::server::Server;
use russh::MethodKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Per-connection handler factory.
struct JumpgateServer {
    state: AppState,
}

impl Server for JumpgateServer {
    type Handler = SessionHandler;

    fn new_client(&mut self, peer: Option<std::net::SocketAddr>) -> SessionHandler {
        SessionHandler::new(self.state.clone(), peer)
    }
}

/// Run the SSH server until it fails or the process shuts down.
pub async fn run_ssh_server(state: AppState) -> anyhow::Result<()> {
    let host_key = load_or_generate_host_key(&state)?;

    let config = russh::server::Config {
        inactivity_timeout: Some(Duration::from_secs(3600)),
        auth_rejection_time: Duration::from_secs(3),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        keys: vec![host_key],
        methods: (&[MethodKind::PublicKey, MethodKind::Password])
            .as_slice()
            .into(),
        ..Default::default()
    };

    let addr = state.config.listen_addr.clone();
    info!(addr = %addr, "Starting SSH server");

    let mut server = JumpgateServer { state };
    server
        .run_on_address(Arc::new(config), addr.as_str())
        .await
        .context("SSH server failed")?;
    Ok(())
}

/// Load the configured host key, or generate and persist an ed25519 key
/// under the base directory on first start.
fn load_or_generate_host_key(state: &AppState) -> anyhow::Result<PrivateKey> {
    let path = state
        .config
        .host_key_file
        .clone()
        .unwrap_or_else(|| state.paths.host_key_file());

    if path.exists() {
        return russh::keys::load_secret_key(&path, None)
            .with_context(|| format!("loading host key {}", path.display()));
    }

    info!(path = %path.display(), "Generating host key");
    let key = PrivateKey::random(&mut rand_core::OsRng, Algorithm::Ed25519)
        .context("generating host key")?;
    let pem = key
        .to_openssh(russh::keys::ssh_key::LineEnding::LF)
        .context("encoding host key")?;
    std::fs::write(&path, pem.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(key)
}
