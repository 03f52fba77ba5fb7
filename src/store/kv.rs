//! Replicated-store client interface.
//!
//! The replicated store is an external collaborator: a gossip-replicated
//! keyspace where each key carries an opaque value, a version, and a TTL.
//! The prefix manager consumes it through the [`KvStore`] trait; the
//! in-process [`MemoryKvStore`](super::memory::MemoryKvStore) implements
//! the same arbitration rules for tests and single-process deployments.
//!
//! Version arbitration is first-writer-wins per version number: a write at
//! a version less than or equal to the stored one is rejected, so an actor
//! that wants to replace a key must observe its current version and bump.

use crate::core::error::TrellisResult;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;

/// Notification that a subscribed key changed.
///
/// `value` is `None` when the key disappeared (TTL expiry observed by the
/// store client).
#[derive(Debug, Clone)]
pub struct KeyUpdate {
    /// The key that changed.
    pub key: String,

    /// New value, if the key still exists.
    pub value: Option<Bytes>,

    /// Version the store now holds for the key.
    pub version: u64,
}

/// Client interface to the replicated key-value store.
///
/// Object-safe so the manager can hold `Arc<dyn KvStore>`.
pub trait KvStore: Send + Sync {
    /// Write a key at the given version with a TTL.
    ///
    /// Rejected with `StoreWriteRejected` when the store already holds the
    /// key at an equal or higher version.
    fn set_key(&self, key: &str, value: Bytes, version: u64, ttl: Duration) -> TrellisResult<()>;

    /// Re-arm the TTL of a key without changing value or version.
    ///
    /// Rejected when the stored version no longer matches, which means
    /// another actor replaced the key since it was published.
    fn refresh_key(&self, key: &str, version: u64, ttl: Duration) -> TrellisResult<()>;

    /// Read a key's current value and version.
    fn get_key(&self, key: &str) -> Option<(Bytes, u64)>;

    /// Dump every live key starting with the given string.
    fn dump_all_with_prefix(&self, prefix: &str) -> Vec<(String, Bytes)>;

    /// Subscribe to changes of every key starting with the given string.
    ///
    /// Updates are fanned out on the provided channel; a closed receiver
    /// drops the subscription.
    fn subscribe_prefix(&self, prefix: &str, tx: mpsc::UnboundedSender<KeyUpdate>);
}
