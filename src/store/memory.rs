//! In-process replicated-store client.
//!
//! [`MemoryKvStore`] holds the keyspace in a version-arbitrated map with
//! lazy TTL expiry: expired entries are purged whenever the map is
//! touched, never by a background task. Deadlines use
//! [`tokio::time::Instant`] so tests driving the clock with paused time
//! observe deterministic expiry.
//!
//! This is the store the integration tests run against; a mesh-backed
//! client implements the same [`KvStore`] trait against the gossip layer.

use crate::core::error::{TrellisError, TrellisResult};
use crate::store::kv::{KeyUpdate, KvStore};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A stored value with its arbitration metadata.
#[derive(Debug, Clone)]
struct StoredValue {
    value: Bytes,
    version: u64,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

struct Subscriber {
    key_prefix: String,
    tx: mpsc::UnboundedSender<KeyUpdate>,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, StoredValue>,
    subscribers: Vec<Subscriber>,
}

impl Inner {
    fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|_, v| !v.is_expired(now));
    }

    /// Fan an update out to matching subscribers, dropping closed ones.
    fn notify(&mut self, key: &str, value: Option<Bytes>, version: u64) {
        self.subscribers.retain(|sub| {
            if !key.starts_with(&sub.key_prefix) {
                return true;
            }
            sub.tx
                .send(KeyUpdate {
                    key: key.to_string(),
                    value: value.clone(),
                    version,
                })
                .is_ok()
        });
    }
}

/// In-memory replicated-store client.
#[derive(Default)]
pub struct MemoryKvStore {
    inner: Mutex<Inner>,
}

impl MemoryKvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn key_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.purge_expired(Instant::now());
        inner.entries.len()
    }

    /// Drop every key without notifying subscribers, simulating a store
    /// that lost state while this node was partitioned from it.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

impl KvStore for MemoryKvStore {
    fn set_key(&self, key: &str, value: Bytes, version: u64, ttl: Duration) -> TrellisResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.purge_expired(now);

        if let Some(existing) = inner.entries.get(key) {
            if existing.version >= version {
                return Err(TrellisError::StoreWriteRejected {
                    key: key.to_string(),
                    version,
                });
            }
        }

        inner.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.clone(),
                version,
                expires_at: Some(now + ttl),
            },
        );
        inner.notify(key, Some(value), version);
        Ok(())
    }

    fn refresh_key(&self, key: &str, version: u64, ttl: Duration) -> TrellisResult<()> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.purge_expired(now);

        match inner.entries.get_mut(key) {
            Some(entry) if entry.version == version => {
                entry.expires_at = Some(now + ttl);
                Ok(())
            }
            _ => Err(TrellisError::StoreWriteRejected {
                key: key.to_string(),
                version,
            }),
        }
    }

    fn get_key(&self, key: &str) -> Option<(Bytes, u64)> {
        let mut inner = self.inner.lock();
        inner.purge_expired(Instant::now());
        inner
            .entries
            .get(key)
            .map(|entry| (entry.value.clone(), entry.version))
    }

    fn dump_all_with_prefix(&self, prefix: &str) -> Vec<(String, Bytes)> {
        let mut inner = self.inner.lock();
        inner.purge_expired(Instant::now());
        inner
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    fn subscribe_prefix(&self, prefix: &str, tx: mpsc::UnboundedSender<KeyUpdate>) {
        self.inner.lock().subscribers.push(Subscriber {
            key_prefix: prefix.to_string(),
            tx,
        });
    }
}
