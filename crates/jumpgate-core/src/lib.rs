//! Core types, configuration, and utilities for the jumpgate bastion.

mod config;
mod error;
mod filter;
mod logging;
mod model;
mod paths;

pub use config::{
    BastionRoute, CloudProfile, Config, HostKeyPolicy, DEFAULT_FANOUT_WIDTH,
    DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LISTEN_ADDR, DEFAULT_LIVENESS_INTERVAL_SECS,
    DEFAULT_LOG_LEVEL, DEFAULT_REFRESH_INTERVAL_SECS, SHELL_TASK_WEBHOOK_TOKEN_ENV,
};
pub use error::{CoreError, CoreResult};
pub use filter::ServerFilter;
pub use logging::{init_logging, parse_level};
pub use model::{
    Action, KeyPair, KeyRegistry, Policy, ScpDirection, ScpRecord, SessionRecord, ShellTask,
    ShellTaskRecord, SshUser, Target, TargetStatus, TaskStatus, User,
};
pub use paths::Paths;
