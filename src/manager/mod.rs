//! Prefix manager runtime.
//!
//! This module contains the per-node origination authority:
//! - [`origin`] - in-memory contribution table with client arbitration
//! - [`snapshot`] - durable non-ephemeral snapshot keeper
//! - [`publish`] - throttled diff-and-publish engine
//! - [`intake`] - external request queue types and validation
//! - [`manager`] - lifecycle, event loop, and direct-call handle

pub mod intake;
pub mod manager;
pub mod origin;
pub mod publish;
pub mod snapshot;

// Re-exports for convenience
pub use intake::{PrefixUpdateCommand, PrefixUpdateRequest};
pub use manager::{ManagerState, ManagerStats, PrefixManager, PrefixManagerHandle};
pub use origin::OriginTable;
pub use publish::{Publisher, PublisherStats, UPDATE_KVSTORE_THROTTLED};
pub use snapshot::{PrefixSnapshot, SnapshotKeeper};
