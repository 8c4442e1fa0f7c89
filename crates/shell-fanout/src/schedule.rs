//! Cron schedule checks.
//!
//! Expressions use the seconds-resolution grammar
//! (`sec min hour dom month dow [year]`) plus `@`-descriptors.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::warn;

/// Whether the expression fires exactly at `now`, at second resolution.
///
/// Unparseable expressions never match.
pub fn cron_matches_now(expr: &str, now: DateTime<Utc>) -> bool {
    cron_fires_within(expr, now - Duration::seconds(1), now)
}

/// Whether the expression has a fire time in the half-open window
/// `(from, to]`.
pub fn cron_fires_within(expr: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    let schedule = match Schedule::from_str(expr) {
        Ok(schedule) => schedule,
        Err(e) => {
            warn!(expr = %expr, error = %e, "Invalid cron expression");
            return false;
        }
    };
    schedule
        .after(&from)
        .next()
        .map(|next| next <= to)
        .unwrap_or(false)
}
