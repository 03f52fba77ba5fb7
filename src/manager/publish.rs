//! Publication engine.
//!
//! Brings the replicated store into agreement with the origin table's
//! winning state, one burst per throttle window. The engine records what
//! it last wrote per key and assigns versions that stay strictly monotone
//! across adversarial rewrites and restarts: every write observes the
//! store's current version and takes `max(local, store) + 1`.
//!
//! Withdrawals are announced, not erased: the key is republished with
//! `delete_prefix` set so peers converge on the withdrawal, then the key
//! ages out of the store because the engine stops refreshing its TTL.

use crate::core::config::Config;
use crate::core::error::TrellisResult;
use crate::core::types::{PerfEvents, Prefix, PrefixDatabase, PrefixEntry};
use crate::manager::origin::OriginTable;
use crate::store::keys::{KeyScope, PrefixKey};
use crate::store::kv::{KeyUpdate, KvStore};
use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Perf-event label attached to throttled publications.
pub const UPDATE_KVSTORE_THROTTLED: &str = "UPDATE_KVSTORE_THROTTLED";

/// What the engine last wrote for a prefix.
#[derive(Debug, Clone)]
struct PublishedEntry {
    entry: PrefixEntry,
    version: u64,
}

/// Publication counters.
#[derive(Debug, Clone, Default)]
pub struct PublisherStats {
    /// Throttle bursts that wrote at least one key.
    pub publications: u64,
    /// Per-key upserts (or legacy database writes).
    pub upserts: u64,
    /// Delete-marker writes.
    pub delete_markers: u64,
    /// Writes the store rejected (version races).
    pub rejected_writes: u64,
    /// TTL refreshes of owned keys.
    pub refreshes: u64,
    /// Republications forced by foreign store content.
    pub forced_republishes: u64,
}

/// The throttled diff-and-publish engine.
pub struct Publisher {
    scope: KeyScope,
    per_prefix_keys: bool,
    perf_measurement: bool,
    key_ttl: Duration,

    /// Last successfully written record per prefix (per-prefix mode).
    last_published: BTreeMap<Prefix, PublishedEntry>,

    /// Prefixes that must be rewritten at the next burst even if the
    /// diff against `last_published` is empty.
    forced: BTreeSet<Prefix>,

    /// Legacy-mode record of the last written database.
    legacy_published: Option<Vec<PrefixEntry>>,
    legacy_version: u64,
    force_legacy: bool,

    stats: PublisherStats,
}

impl Publisher {
    /// Create an engine for the configured node.
    pub fn new(config: &Config) -> TrellisResult<Self> {
        Ok(Self {
            scope: KeyScope::new(&config.node.name, &config.node.area)?,
            per_prefix_keys: config.advertise.per_prefix_keys,
            perf_measurement: config.advertise.perf_measurement,
            key_ttl: config.key_ttl(),
            last_published: BTreeMap::new(),
            forced: BTreeSet::new(),
            legacy_published: None,
            legacy_version: 0,
            force_legacy: false,
            stats: PublisherStats::default(),
        })
    }

    /// Scan prefix covering every key this engine may own.
    pub fn subscription_scope(&self) -> String {
        if self.per_prefix_keys {
            self.scope.scan_prefix()
        } else {
            self.scope.legacy_key()
        }
    }

    /// Whether a forced republication is queued for the next burst.
    pub fn has_pending(&self) -> bool {
        !self.forced.is_empty() || self.force_legacy
    }

    /// Number of keys currently owned in the store.
    pub fn owned_key_count(&self) -> usize {
        if self.per_prefix_keys {
            self.last_published.len()
        } else {
            usize::from(self.legacy_published.is_some())
        }
    }

    /// Publication counters.
    pub fn stats(&self) -> &PublisherStats {
        &self.stats
    }

    /// Run one publication burst. Returns the number of keys written.
    pub fn publish(&mut self, kv: &dyn KvStore, table: &OriginTable) -> usize {
        let writes = if self.per_prefix_keys {
            self.publish_per_prefix(kv, table)
        } else {
            self.publish_legacy(kv, table)
        };
        if writes > 0 {
            self.stats.publications += 1;
        }
        writes
    }

    fn publish_per_prefix(&mut self, kv: &dyn KvStore, table: &OriginTable) -> usize {
        let current = table.winners_by_prefix();
        let forced = std::mem::take(&mut self.forced);
        let mut writes = 0;

        // Withdrawals: rows gone from the table, plus forced keys nobody
        // owns anymore (foreign rewrites of already-withdrawn keys).
        let mut withdrawals: BTreeSet<Prefix> = self
            .last_published
            .keys()
            .copied()
            .filter(|prefix| !current.contains_key(prefix))
            .collect();
        withdrawals.extend(
            forced
                .iter()
                .copied()
                .filter(|prefix| !current.contains_key(prefix)),
        );

        for prefix in withdrawals {
            let (entry, local_version) = match self.last_published.get(&prefix) {
                Some(published) => (published.entry.clone(), published.version),
                None => (PrefixEntry::withdraw_marker(prefix), 0),
            };
            let key = self.scope.key(prefix).encode();
            let db = self.database(vec![entry], true);
            if let Some(version) = self.write(kv, &key, &db, local_version) {
                self.last_published.remove(&prefix);
                self.stats.delete_markers += 1;
                writes += 1;
                tracing::debug!(key = %key, version, "withdrawal published");
            }
        }

        for (prefix, winner) in current {
            let (needs_write, local_version) = match self.last_published.get(&prefix) {
                Some(published) => (
                    published.entry != winner || forced.contains(&prefix),
                    published.version,
                ),
                None => (true, 0),
            };
            if !needs_write {
                continue;
            }
            let key = self.scope.key(prefix).encode();
            let db = self.database(vec![winner.clone()], false);
            if let Some(version) = self.write(kv, &key, &db, local_version) {
                self.last_published
                    .insert(prefix, PublishedEntry { entry: winner, version });
                self.stats.upserts += 1;
                writes += 1;
                tracing::debug!(key = %key, version, "prefix published");
            }
        }
        writes
    }

    fn publish_legacy(&mut self, kv: &dyn KvStore, table: &OriginTable) -> usize {
        let current = table.winners();
        if !self.force_legacy && self.legacy_published.as_ref() == Some(&current) {
            return 0;
        }
        self.force_legacy = false;

        let key = self.scope.legacy_key();
        let db = self.database(current.clone(), false);
        match self.write(kv, &key, &db, self.legacy_version) {
            Some(version) => {
                self.legacy_version = version;
                self.legacy_published = Some(current);
                self.stats.upserts += 1;
                tracing::debug!(key = %key, version, "prefix database published");
                1
            }
            None => 0,
        }
    }

    /// Classify a store notification for a key under this node's scope.
    ///
    /// Returns true when a republication must be scheduled: the store
    /// holds content the engine did not publish, either for a prefix it
    /// still owns (re-assert the intended value) or for one it withdrew
    /// (re-assert the delete-marker at a bumped version).
    pub fn handle_store_event(&mut self, table: &OriginTable, update: &KeyUpdate) -> bool {
        if self.per_prefix_keys {
            self.handle_per_prefix_event(table, update)
        } else {
            self.handle_legacy_event(table, update)
        }
    }

    fn handle_per_prefix_event(&mut self, table: &OriginTable, update: &KeyUpdate) -> bool {
        let Ok(key) = PrefixKey::decode(&update.key) else {
            tracing::debug!(key = %update.key, "ignoring undecodable key in scope");
            return false;
        };
        if key.node() != self.scope.node() || key.area() != self.scope.area() {
            return false;
        }
        let prefix = key.prefix();

        let received = match &update.value {
            Some(raw) => match PrefixDatabase::decode(raw) {
                Ok(db) => Some(db),
                Err(_) => {
                    // Foreign garbage under an owned key; re-assert either
                    // the intended value or the withdrawal
                    tracing::warn!(key = %update.key, "undecodable value under owned key");
                    return self.force(prefix);
                }
            },
            None => None,
        };

        match (table.winner(prefix), received) {
            (Some(winner), Some(db)) => {
                if db.same_content(&self.intended(winner)) {
                    false
                } else {
                    tracing::warn!(
                        key = %update.key,
                        version = update.version,
                        "owned key overwritten, scheduling republish"
                    );
                    self.force(prefix)
                }
            }
            // Key vanished while still owned
            (Some(_), None) => self.force(prefix),
            (None, Some(db)) => {
                if db.delete_prefix {
                    false
                } else {
                    tracing::warn!(
                        key = %update.key,
                        version = update.version,
                        "withdrawn key re-advertised by another actor"
                    );
                    self.force(prefix)
                }
            }
            (None, None) => false,
        }
    }

    fn handle_legacy_event(&mut self, table: &OriginTable, update: &KeyUpdate) -> bool {
        if update.key != self.scope.legacy_key() {
            return false;
        }
        let intended = PrefixDatabase {
            node_name: self.scope.node().to_string(),
            prefix_entries: table.winners(),
            delete_prefix: false,
            perf_events: None,
            area: self.scope.area().to_string(),
        };
        let matches = update
            .value
            .as_ref()
            .and_then(|raw| PrefixDatabase::decode(raw).ok())
            .is_some_and(|db| db.same_content(&intended));
        if matches {
            return false;
        }
        tracing::warn!(key = %update.key, "node database overwritten, scheduling republish");
        self.force_legacy = true;
        self.stats.forced_republishes += 1;
        true
    }

    /// Reconciliation sweep: compare the store's view of this node's keys
    /// with the intended state and queue republication for any owned key
    /// that is missing (TTL'd out) or carries foreign content.
    ///
    /// Returns true when anything was queued.
    pub fn sweep(&mut self, kv: &dyn KvStore, table: &OriginTable) -> bool {
        if !self.per_prefix_keys {
            if self.legacy_published.is_none() {
                return false;
            }
            let intended = PrefixDatabase {
                node_name: self.scope.node().to_string(),
                prefix_entries: table.winners(),
                delete_prefix: false,
                perf_events: None,
                area: self.scope.area().to_string(),
            };
            let matches = kv
                .get_key(&self.scope.legacy_key())
                .and_then(|(raw, _)| PrefixDatabase::decode(&raw).ok())
                .is_some_and(|db| db.same_content(&intended));
            if !matches {
                self.force_legacy = true;
            }
            return self.force_legacy;
        }

        let dump: BTreeMap<String, Bytes> = kv
            .dump_all_with_prefix(&self.scope.scan_prefix())
            .into_iter()
            .collect();
        let current = table.winners_by_prefix();
        let mut queued = false;

        for (prefix, winner) in &current {
            let key = self.scope.key(*prefix).encode();
            let intact = dump
                .get(&key)
                .and_then(|raw| PrefixDatabase::decode(raw).ok())
                .is_some_and(|db| db.same_content(&self.intended(winner)));
            if !intact {
                queued |= self.force(*prefix);
            }
        }

        // Keys still in the store for prefixes this node no longer owns:
        // anything not carrying a delete-marker needs one
        for (key, raw) in &dump {
            let Ok(decoded) = PrefixKey::decode(key) else {
                continue;
            };
            if decoded.area() != self.scope.area() || current.contains_key(&decoded.prefix()) {
                continue;
            }
            let withdrawn = PrefixDatabase::decode(raw)
                .map(|db| db.delete_prefix)
                .unwrap_or(false);
            if !withdrawn {
                queued |= self.force(decoded.prefix());
            }
        }
        queued
    }

    /// Re-arm the TTL of every owned key. Withdrawn keys are left to age
    /// out.
    pub fn refresh(&mut self, kv: &dyn KvStore) {
        if self.per_prefix_keys {
            let owned: Vec<(String, u64)> = self
                .last_published
                .iter()
                .map(|(prefix, published)| {
                    (self.scope.key(*prefix).encode(), published.version)
                })
                .collect();
            for (key, version) in owned {
                match kv.refresh_key(&key, version, self.key_ttl) {
                    Ok(()) => self.stats.refreshes += 1,
                    Err(_) => {
                        // Replaced since publication; the subscription or
                        // sweep path handles the re-assert
                        tracing::debug!(key = %key, version, "refresh skipped, version moved");
                    }
                }
            }
        } else if self.legacy_published.is_some()
            && kv
                .refresh_key(&self.scope.legacy_key(), self.legacy_version, self.key_ttl)
                .is_ok()
        {
            self.stats.refreshes += 1;
        }
    }

    /// Announce withdrawal of every owned key; the shutdown path.
    pub fn drain(&mut self, kv: &dyn KvStore) {
        if self.per_prefix_keys {
            let published = std::mem::take(&mut self.last_published);
            for (prefix, record) in published {
                let key = self.scope.key(prefix).encode();
                let db = self.database(vec![record.entry], true);
                if let Some(version) = self.write(kv, &key, &db, record.version) {
                    self.stats.delete_markers += 1;
                    tracing::debug!(key = %key, version, "withdrawal published on drain");
                }
            }
        } else if self.legacy_published.take().is_some() {
            let key = self.scope.legacy_key();
            let db = self.database(Vec::new(), false);
            if let Some(version) = self.write(kv, &key, &db, self.legacy_version) {
                self.legacy_version = version;
                self.stats.upserts += 1;
                tracing::debug!(key = %key, version, "empty database published on drain");
            }
        }
        self.forced.clear();
        self.force_legacy = false;
    }

    fn force(&mut self, prefix: Prefix) -> bool {
        self.forced.insert(prefix);
        self.stats.forced_republishes += 1;
        true
    }

    /// The record peers should hold for a winning entry.
    fn intended(&self, winner: &PrefixEntry) -> PrefixDatabase {
        PrefixDatabase {
            node_name: self.scope.node().to_string(),
            prefix_entries: vec![winner.clone()],
            delete_prefix: false,
            perf_events: None,
            area: self.scope.area().to_string(),
        }
    }

    fn database(&self, prefix_entries: Vec<PrefixEntry>, delete_prefix: bool) -> PrefixDatabase {
        let perf_events = self
            .perf_measurement
            .then(|| PerfEvents::with_event(UPDATE_KVSTORE_THROTTLED, self.scope.node()));
        PrefixDatabase {
            node_name: self.scope.node().to_string(),
            prefix_entries,
            delete_prefix,
            perf_events,
            area: self.scope.area().to_string(),
        }
    }

    /// Write one key, observing the store's version and retrying a lost
    /// race once. Returns the version written on success.
    fn write(
        &mut self,
        kv: &dyn KvStore,
        key: &str,
        db: &PrefixDatabase,
        local_version: u64,
    ) -> Option<u64> {
        let value = match db.encode() {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(key = %key, %error, "publication encode failed");
                return None;
            }
        };

        for attempt in 0..2 {
            let store_version = kv.get_key(key).map(|(_, version)| version).unwrap_or(0);
            let version = local_version.max(store_version) + 1;
            match kv.set_key(key, value.clone(), version, self.key_ttl) {
                Ok(()) => return Some(version),
                Err(error) => {
                    self.stats.rejected_writes += 1;
                    if attempt == 0 {
                        tracing::debug!(key = %key, version, "write rejected, refetching version");
                    } else {
                        // Give up for this window; the subscription event
                        // for the competing write triggers the retry
                        tracing::warn!(key = %key, version, %error, "write rejected twice");
                    }
                }
            }
        }
        None
    }
}
