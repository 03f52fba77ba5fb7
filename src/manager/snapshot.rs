//! Durable snapshot of the non-ephemeral origin table.
//!
//! One bincode record under a fixed config-store key holds every
//! persistent `(prefix, client)` contribution. The keeper tracks the
//! last projection it wrote so that mutations confined to ephemeral
//! entries never touch the disk.

use crate::core::config::SNAPSHOT_STORE_KEY;
use crate::core::error::{TrellisError, TrellisResult};
use crate::core::types::{Prefix, PrefixEntry, PrefixType};
use crate::manager::origin::OriginTable;
use crate::store::persistent::ConfigStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The persisted record: every non-ephemeral contribution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrefixSnapshot {
    /// Contributions across all clients; client identity is carried
    /// inside each entry.
    pub entries: Vec<PrefixEntry>,
}

type Projection = BTreeMap<(Prefix, PrefixType), PrefixEntry>;

/// Keeper of the durable snapshot record.
pub struct SnapshotKeeper {
    store: Arc<dyn ConfigStore>,
    last_saved: Projection,
}

impl SnapshotKeeper {
    /// Open the keeper, loading the persisted snapshot.
    ///
    /// A missing record is first boot. An undecodable record is logged
    /// and treated the same way. Ephemeral entries that somehow reached
    /// disk are discarded; surviving entries are unconditionally marked
    /// non-ephemeral.
    pub fn open(store: Arc<dyn ConfigStore>) -> TrellisResult<Self> {
        let snapshot = match store.load(SNAPSHOT_STORE_KEY)? {
            Some(raw) => match bincode::deserialize::<PrefixSnapshot>(&raw) {
                Ok(snapshot) => snapshot,
                Err(error) => {
                    tracing::warn!(%error, "prefix snapshot undecodable, starting empty");
                    PrefixSnapshot::default()
                }
            },
            None => PrefixSnapshot::default(),
        };

        let last_saved: Projection = snapshot
            .entries
            .into_iter()
            .filter(|entry| !entry.ephemeral)
            .map(|mut entry| {
                entry.ephemeral = false;
                ((entry.prefix, entry.prefix_type), entry)
            })
            .collect();

        tracing::debug!(entries = last_saved.len(), "prefix snapshot loaded");
        Ok(Self { store, last_saved })
    }

    /// Entries to seed the origin table with at startup.
    pub fn entries(&self) -> Vec<PrefixEntry> {
        self.last_saved.values().cloned().collect()
    }

    /// Persist the table's non-ephemeral projection unconditionally.
    pub fn save(&mut self, table: &OriginTable) -> TrellisResult<()> {
        let current = Self::projection(table);
        self.write(current)
    }

    /// Persist the table's non-ephemeral projection if it changed.
    ///
    /// Returns whether a physical write happened. On write failure the
    /// tracked projection is left untouched so the next successful write
    /// reconciles the on-disk state.
    pub fn save_if_dirty(&mut self, table: &OriginTable) -> TrellisResult<bool> {
        let current = Self::projection(table);
        if current == self.last_saved {
            return Ok(false);
        }
        self.write(current)?;
        Ok(true)
    }

    fn projection(table: &OriginTable) -> Projection {
        table
            .all_entries()
            .filter(|entry| !entry.ephemeral)
            .map(|entry| ((entry.prefix, entry.prefix_type), entry.clone()))
            .collect()
    }

    fn write(&mut self, current: Projection) -> TrellisResult<()> {
        let snapshot = PrefixSnapshot {
            entries: current.values().cloned().collect(),
        };
        let raw = bincode::serialize(&snapshot).map_err(|error| {
            TrellisError::SnapshotWriteFailure {
                message: error.to_string(),
            }
        })?;
        self.store
            .store(SNAPSHOT_STORE_KEY, raw.into())
            .map_err(|error| TrellisError::SnapshotWriteFailure {
                message: error.to_string(),
            })?;

        tracing::debug!(entries = snapshot.entries.len(), "prefix snapshot written");
        self.last_saved = current;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::persistent::MemoryConfigStore;
    use bytes::Bytes;

    fn entry(prefix: &str, prefix_type: PrefixType, ephemeral: bool) -> PrefixEntry {
        PrefixEntry::new(prefix.parse().unwrap(), prefix_type).ephemeral(ephemeral)
    }

    #[test]
    fn ephemeral_changes_do_not_write() {
        let store = Arc::new(MemoryConfigStore::new());
        let mut keeper = SnapshotKeeper::open(store.clone()).unwrap();
        let mut table = OriginTable::new();

        table.advertise(&[
            entry("ffff:10:4:9::/64", PrefixType::Bgp, false),
            entry("ffff:10:4:10::/64", PrefixType::Bgp, true),
        ]);
        assert!(keeper.save_if_dirty(&table).unwrap());
        assert_eq!(store.num_writes_to_disk(), 1);

        // Withdrawing the ephemeral entry leaves the projection unchanged
        table.withdraw(&[entry("ffff:10:4:10::/64", PrefixType::Bgp, true)]);
        assert!(!keeper.save_if_dirty(&table).unwrap());
        assert_eq!(store.num_writes_to_disk(), 1);

        // Withdrawing the persistent entry writes again
        table.withdraw(&[entry("ffff:10:4:9::/64", PrefixType::Bgp, false)]);
        assert!(keeper.save_if_dirty(&table).unwrap());
        assert_eq!(store.num_writes_to_disk(), 2);
    }

    #[test]
    fn reload_drops_ephemeral_entries() {
        let store = Arc::new(MemoryConfigStore::new());
        let mut keeper = SnapshotKeeper::open(store.clone()).unwrap();
        let mut table = OriginTable::new();
        table.advertise(&[entry("10.1.1.1/32", PrefixType::Default, false)]);
        keeper.save_if_dirty(&table).unwrap();

        // A snapshot that somehow carries an ephemeral entry loses it on load
        let polluted = PrefixSnapshot {
            entries: vec![
                entry("10.1.1.1/32", PrefixType::Default, false),
                entry("10.2.2.2/32", PrefixType::Bgp, true),
            ],
        };
        store
            .store(
                SNAPSHOT_STORE_KEY,
                bincode::serialize(&polluted).unwrap().into(),
            )
            .unwrap();

        let reloaded = SnapshotKeeper::open(store).unwrap();
        let entries = reloaded.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prefix_type, PrefixType::Default);
        assert!(!entries[0].ephemeral);
    }

    #[test]
    fn corrupt_snapshot_is_first_boot() {
        let store = Arc::new(MemoryConfigStore::new());
        store
            .store(SNAPSHOT_STORE_KEY, Bytes::from_static(b"\xde\xad\xbe\xef"))
            .unwrap();

        let keeper = SnapshotKeeper::open(store).unwrap();
        assert!(keeper.entries().is_empty());
    }

    #[test]
    fn reload_does_not_rewrite_unchanged_state() {
        let store = Arc::new(MemoryConfigStore::new());
        let mut keeper = SnapshotKeeper::open(store.clone()).unwrap();
        let mut table = OriginTable::new();
        table.advertise(&[entry("10.1.1.1/32", PrefixType::Default, false)]);
        keeper.save_if_dirty(&table).unwrap();
        let writes = store.num_writes_to_disk();

        // A fresh keeper seeded from the same snapshot sees a clean state
        let mut keeper2 = SnapshotKeeper::open(store.clone()).unwrap();
        let mut table2 = OriginTable::new();
        table2.advertise(&keeper2.entries());
        assert!(!keeper2.save_if_dirty(&table2).unwrap());
        assert_eq!(store.num_writes_to_disk(), writes);
    }
}
