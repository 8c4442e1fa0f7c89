//! Scheduled shell fan-out and liveness probing.
//!
//! On every tick the executor promotes cron-due tasks to `Pending`, claims
//! them with a compare-and-set so replicas never double-run, fans the shell
//! command out across the matching fleet slice under a bounded width, and
//! aggregates per-host results into a terminal status. The liveness prober
//! dials a configured checklist of hosts and raises one alarm per outage.

mod executor;
mod liveness;
mod schedule;

pub use executor::{FanoutExecutor, UpstreamRunner};
pub use liveness::LivenessProber;
pub use schedule::{cron_fires_within, cron_matches_now};
