//! The dialer: key material loading, optional bastion hop, authenticated
//! client construction.

use crate::verify::HostKeyVerifier;
use crate::{DialError, DialResult};
use base64::Engine;
use jumpgate_core::{BastionRoute, HostKeyPolicy, KeyPair, KeyRegistry, SshUser, Target};
use russh::client::{self, Handle};
use russh::keys::{decode_secret_key, load_secret_key, HashAlg, PrivateKey, PrivateKeyWithHashAlg};
use russh::ChannelMsg;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Collected output of a remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Joined stdout and stderr, in arrival order.
    pub output: String,
    pub exit_code: u32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An authenticated upstream connection, optionally tunnelled through a
/// bastion. Owns both clients; `close` tears down target first, bastion
/// second.
pub struct UpstreamHandle {
    target: Handle<HostKeyVerifier>,
    bastion: Option<Handle<HostKeyVerifier>>,
    addr: String,
}

impl UpstreamHandle {
    /// Open a session channel on the target connection.
    pub async fn open_session(&self) -> DialResult<russh::Channel<client::Msg>> {
        Ok(self.target.channel_open_session().await?)
    }

    /// Run a command and collect its joined output and exit code.
    pub async fn run_command(&self, command: &str) -> DialResult<CommandOutput> {
        let mut channel = self.open_session().await?;
        channel.exec(true, command).await?;

        let mut output = Vec::new();
        let mut exit_code = 0u32;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status,
                _ => {}
            }
        }

        Ok(CommandOutput {
            output: String::from_utf8_lossy(&output).into_owned(),
            exit_code,
        })
    }

    /// The address this handle is connected to, for logging.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Disconnect in reverse acquisition order: target, then bastion.
    pub async fn close(&self) {
        let _ = self
            .target
            .disconnect(russh::Disconnect::ByApplication, "session closed", "en")
            .await;
        if let Some(bastion) = &self.bastion {
            let _ = bastion
                .disconnect(russh::Disconnect::ByApplication, "session closed", "en")
                .await;
        }
    }
}

/// Builds authenticated upstream connections from registry key material.
pub struct Dialer {
    config: Arc<client::Config>,
    policy: HostKeyPolicy,
    known_hosts: PathBuf,
    registry: KeyRegistry,
    bastions: Vec<BastionRoute>,
}

impl Dialer {
    pub fn new(
        policy: HostKeyPolicy,
        known_hosts: PathBuf,
        registry: KeyRegistry,
        bastions: Vec<BastionRoute>,
    ) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            policy,
            known_hosts,
            registry,
            bastions,
        }
    }

    /// Dial `target` as `ssh_user`, hopping through a bastion when one is
    /// configured for the target's network.
    pub async fn dial(&self, target: &Target, ssh_user: &SshUser) -> DialResult<UpstreamHandle> {
        let key = self.load_key(&ssh_user.key_name)?;
        let addr = format!("{}:{}", target.host, target.port);

        let route = self
            .bastions
            .iter()
            .filter(|b| target.host.starts_with(&b.network_prefix))
            .max_by_key(|b| b.network_prefix.len());

        let (handle, bastion) = match route {
            Some(route) => {
                debug!(target = %addr, bastion = %route.host, "Dialing through bastion");
                let mut bastion_handle = self.connect_direct(&route.host, route.port).await?;
                let bastion_key = self.load_key(&route.key_name)?;
                self.authenticate_with_key(
                    &mut bastion_handle,
                    &route.username,
                    bastion_key,
                    &route.host,
                )
                .await?;

                let channel = bastion_handle
                    .channel_open_direct_tcpip(
                        target.host.clone(),
                        u32::from(target.port),
                        "127.0.0.1",
                        0,
                    )
                    .await
                    .map_err(|e| DialError::Handshake {
                        addr: addr.clone(),
                        source: e,
                    })?;

                let verifier = HostKeyVerifier::new(
                    self.policy,
                    self.known_hosts.clone(),
                    &target.host,
                    target.port,
                );
                let handle =
                    client::connect_stream(self.config.clone(), channel.into_stream(), verifier)
                        .await
                        .map_err(|e| match e {
                            DialError::Ssh(source) => DialError::Handshake {
                                addr: addr.clone(),
                                source,
                            },
                            other => other,
                        })?;
                (handle, Some(bastion_handle))
            }
            None => (self.connect_direct(&target.host, target.port).await?, None),
        };

        let mut handle = handle;
        self.authenticate_with_key(&mut handle, &ssh_user.username, key, &addr)
            .await?;

        info!(target = %addr, user = %ssh_user.username, "Upstream connection established");
        Ok(UpstreamHandle {
            target: handle,
            bastion,
            addr,
        })
    }

    async fn connect_direct(&self, host: &str, port: u16) -> DialResult<Handle<HostKeyVerifier>> {
        let addr = format!("{host}:{port}");
        let verifier = HostKeyVerifier::new(self.policy, self.known_hosts.clone(), host, port);

        let connect = client::connect(self.config.clone(), (host, port), verifier);
        match timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(DialError::Ssh(russh::Error::IO(e)))) => {
                Err(DialError::Network { addr, source: e })
            }
            Ok(Err(DialError::Ssh(e))) => Err(DialError::Handshake { addr, source: e }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(DialError::Network {
                addr,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            }),
        }
    }

    async fn authenticate_with_key(
        &self,
        handle: &mut Handle<HostKeyVerifier>,
        username: &str,
        key: PrivateKey,
        addr: &str,
    ) -> DialResult<()> {
        let best_hash: Option<HashAlg> = handle.best_supported_rsa_hash().await?.flatten();
        let auth = handle
            .authenticate_publickey(
                username,
                PrivateKeyWithHashAlg::new(Arc::new(key), best_hash),
            )
            .await?;

        if !auth.success() {
            return Err(DialError::Authentication {
                user: username.to_string(),
                addr: addr.to_string(),
            });
        }
        Ok(())
    }

    /// Load private key material from the registry: identity file first,
    /// inline PEM second.
    fn load_key(&self, key_name: &str) -> DialResult<PrivateKey> {
        let pair = self.registry.get(key_name).ok_or_else(|| DialError::Key {
            key_name: key_name.to_string(),
            reason: "not found in registry".to_string(),
        })?;

        load_key_material(pair).map_err(|reason| DialError::Key {
            key_name: key_name.to_string(),
            reason,
        })
    }
}

/// Decode a key pair's private material.
fn load_key_material(pair: &KeyPair) -> Result<PrivateKey, String> {
    if let Some(path) = &pair.identity_file {
        return load_secret_key(path, None).map_err(|e| e.to_string());
    }
    if let Some(encoded) = &pair.pem_base64 {
        let pem = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| format!("invalid base64: {e}"))?;
        let pem = String::from_utf8(pem).map_err(|_| "PEM is not UTF-8".to_string())?;
        return decode_secret_key(&pem, None).map_err(|e| e.to_string());
    }
    Err("neither identity_file nor pem_base64 present".to_string())
}
