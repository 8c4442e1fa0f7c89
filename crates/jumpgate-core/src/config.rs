//! Configuration document for the bastion daemon.

use crate::model::KeyPair;
use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default listening address for the downstream SSH server.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:22222";
/// Default inventory refresh interval, seconds.
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 300;
/// Default idle timeout for interactive sessions, seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 1800;
/// Default liveness probe interval, seconds.
pub const DEFAULT_LIVENESS_INTERVAL_SECS: u64 = 300;
/// Default fan-out concurrency width.
pub const DEFAULT_FANOUT_WIDTH: usize = 64;

/// Environment variable overriding the chat token used for shell-task
/// notifications.
pub const SHELL_TASK_WEBHOOK_TOKEN_ENV: &str = "JMS_DINGTALK_WEB_HOOK_TOKEN";

/// Host key verification policy for upstream connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Reject keys not present in the known-hosts file.
    Strict,
    /// Accept and record the first key seen per host, reject changes after.
    TrustOnFirstUse,
    /// Accept any key.
    Insecure,
}

impl Default for HostKeyPolicy {
    fn default() -> Self {
        HostKeyPolicy::TrustOnFirstUse
    }
}

/// A cloud profile to enumerate during inventory refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudProfile {
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub regions: Vec<String>,
}

/// A bastion hop rule: targets whose host starts with `network_prefix` are
/// reached through the given intermediate host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BastionRoute {
    pub network_prefix: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    /// Key registry entry used to authenticate against the bastion.
    pub key_name: String,
}

fn default_ssh_port() -> u16 {
    22
}

/// Main daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Downstream SSH listening address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Server host key file; generated under the base dir when absent.
    #[serde(default)]
    pub host_key_file: Option<PathBuf>,
    /// Inventory refresh interval, seconds.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Interactive idle timeout, seconds.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Directory for session recordings and SCP spool files. Recording is
    /// enabled when set; spool files fall back to /tmp when unset.
    #[serde(default)]
    pub recording_dir: Option<PathBuf>,
    /// Upstream host key verification policy.
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// Cloud profiles to enumerate.
    #[serde(default)]
    pub profiles: Vec<CloudProfile>,
    /// Key registry entries.
    #[serde(default)]
    pub keys: Vec<KeyPair>,
    /// Bastion hop routes, longest matching prefix wins.
    #[serde(default)]
    pub bastions: Vec<BastionRoute>,
    /// Hosts checked by the liveness prober.
    #[serde(default)]
    pub liveness_hosts: Vec<String>,
    /// Liveness probe interval, seconds.
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,
    /// Chat webhook token for notifications.
    #[serde(default)]
    pub chat_token: Option<String>,
    /// Maximum concurrent hosts per fan-out task.
    #[serde(default = "default_fanout_width")]
    pub fanout_width: usize,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_liveness_interval() -> u64 {
    DEFAULT_LIVENESS_INTERVAL_SECS
}

fn default_fanout_width() -> usize {
    DEFAULT_FANOUT_WIDTH
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            listen_addr: default_listen_addr(),
            host_key_file: None,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            recording_dir: None,
            host_key_policy: HostKeyPolicy::default(),
            profiles: Vec::new(),
            keys: Vec::new(),
            bastions: Vec::new(),
            liveness_hosts: Vec::new(),
            liveness_interval_secs: DEFAULT_LIVENESS_INTERVAL_SECS,
            chat_token: None,
            fanout_width: DEFAULT_FANOUT_WIDTH,
        }
    }
}

impl Config {
    /// Load configuration from the conventional path, falling back to
    /// defaults when the file does not exist.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the conventional path.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(level) = std::env::var("JUMPGATE_LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// The chat token used for shell-task notifications. The environment
    /// variable takes precedence over the config document.
    pub fn shell_task_webhook_token(&self) -> Option<String> {
        std::env::var(SHELL_TASK_WEBHOOK_TOKEN_ENV)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.chat_token.clone())
    }

    /// Find the bastion route for a target host, longest matching prefix
    /// first.
    pub fn bastion_for(&self, host: &str) -> Option<&BastionRoute> {
        self.bastions
            .iter()
            .filter(|b| host.starts_with(&b.network_prefix))
            .max_by_key(|b| b.network_prefix.len())
    }

    fn validate(&self) -> CoreResult<()> {
        if self.refresh_interval_secs == 0 {
            return Err(CoreError::Config(
                "refresh_interval_secs must be positive".to_string(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(CoreError::Config(
                "idle_timeout_secs must be positive".to_string(),
            ));
        }
        if self.fanout_width == 0 {
            return Err(CoreError::Config(
                "fanout_width must be positive".to_string(),
            ));
        }
        for key in &self.keys {
            if key.identity_file.is_none() && key.pem_base64.is_none() {
                return Err(CoreError::Config(format!(
                    "key {} has neither identity_file nor pem_base64",
                    key.name
                )));
            }
        }
        Ok(())
    }
}
