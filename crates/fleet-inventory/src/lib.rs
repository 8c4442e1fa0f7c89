//! Fleet inventory cache.
//!
//! Holds the current set of reachable targets and the key material needed to
//! log into them. The proxy's hot path never waits on a provider API: reads
//! go through an atomically swapped immutable snapshot, and the refresh task
//! builds a complete replacement off to the side before publishing it.

mod cache;
mod snapshot;

pub use cache::{InventoryCache, RefreshStats};
pub use snapshot::FleetSnapshot;
