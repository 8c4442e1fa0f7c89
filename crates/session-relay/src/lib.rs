//! The in-session engine.
//!
//! Everything that runs inside an authenticated downstream session lives
//! here: the target picker menu, the interactive byte proxy with idle
//! timeout and session recording, and the SCP relay with its per-request
//! permission checks and payload spooling.

mod error;
mod menu;
mod proxy;
mod readline;
mod recording;
mod scp;

pub use error::{RelayError, RelayResult};
pub use menu::{resolve_direct, resolve_scp_destination, MenuAction, ScpDestination, TargetMenu};
pub use proxy::{run_interactive, InteractiveConfig, ProxyOutcome, WindowChange};
pub use readline::read_line_echo;
pub use recording::SessionRecorder;
pub use scp::{handle_download, handle_upload, ScpContext, ScpStreams, UpstreamScp};
