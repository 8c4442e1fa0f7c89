//! Collaborator contracts consumed by the bastion core, plus the in-process
//! implementations shipped with it.
//!
//! The relational store, the cloud providers, the directory service, and the
//! chat bot are external systems. The core talks to them exclusively through
//! the traits in this crate; tests and single-node deployments use the
//! in-memory implementations.

mod error;
mod memory;
mod traits;
mod webhook;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryDirectory, MemoryStore, RecordingNotifier};
pub use traits::{
    CloudAdapter, DirectoryAuth, Instance, InstancePage, Notifier, PersistStore,
};
pub use webhook::WebhookNotifier;
