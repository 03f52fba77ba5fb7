//! Origin table: the in-memory source of truth for advertised prefixes.
//!
//! Each prefix row holds one contribution per client; the winning entry
//! is the contribution whose client carries the lowest priority tag.
//! Every mutation returns whether the contribution map changed, which is
//! the dirty signal for both publication and the durable snapshot.

use crate::core::types::{Prefix, PrefixEntry, PrefixType};
use std::collections::BTreeMap;

/// Per-prefix contribution rows keyed by client.
///
/// `BTreeMap<PrefixType, _>` orders contributions by priority tag, so the
/// first value of a row is its winner.
pub struct OriginTable {
    rows: BTreeMap<Prefix, BTreeMap<PrefixType, PrefixEntry>>,
}

impl OriginTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    /// Insert or replace each `(prefix, client)` contribution.
    ///
    /// Returns true iff any contribution was created or replaced with a
    /// different value.
    pub fn advertise(&mut self, entries: &[PrefixEntry]) -> bool {
        let mut changed = false;
        for entry in entries {
            let row = self.rows.entry(entry.prefix).or_default();
            match row.get(&entry.prefix_type) {
                Some(existing) if existing == entry => {}
                _ => {
                    row.insert(entry.prefix_type, entry.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Remove each exact `(prefix, client)` contribution.
    ///
    /// The batch is atomic: if any requested pair is absent — including a
    /// prefix present only under a different client — nothing is removed
    /// and the call returns false.
    pub fn withdraw(&mut self, entries: &[PrefixEntry]) -> bool {
        if entries.is_empty() {
            return false;
        }
        for entry in entries {
            let present = self
                .rows
                .get(&entry.prefix)
                .is_some_and(|row| row.contains_key(&entry.prefix_type));
            if !present {
                return false;
            }
        }

        for entry in entries {
            if let Some(row) = self.rows.get_mut(&entry.prefix) {
                row.remove(&entry.prefix_type);
                if row.is_empty() {
                    self.rows.remove(&entry.prefix);
                }
            }
        }
        true
    }

    /// Remove every contribution of the given client.
    ///
    /// Returns true iff anything was removed.
    pub fn withdraw_by_type(&mut self, prefix_type: PrefixType) -> bool {
        let mut changed = false;
        self.rows.retain(|_, row| {
            if row.remove(&prefix_type).is_some() {
                changed = true;
            }
            !row.is_empty()
        });
        changed
    }

    /// Atomically replace the client's contribution set with `entries`.
    ///
    /// Returns true iff the resulting contribution map differs from the
    /// prior one for any prefix.
    pub fn sync_by_type(&mut self, prefix_type: PrefixType, entries: &[PrefixEntry]) -> bool {
        let mut changed = false;

        // Drop contributions the new set no longer carries
        self.rows.retain(|prefix, row| {
            let keep_contribution = entries
                .iter()
                .any(|e| e.prefix_type == prefix_type && e.prefix == *prefix);
            if !keep_contribution && row.remove(&prefix_type).is_some() {
                changed = true;
            }
            !row.is_empty()
        });

        for entry in entries {
            if entry.prefix_type != prefix_type {
                continue;
            }
            let row = self.rows.entry(entry.prefix).or_default();
            match row.get(&prefix_type) {
                Some(existing) if existing == entry => {}
                _ => {
                    row.insert(prefix_type, entry.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Winning entry for one prefix.
    pub fn winner(&self, prefix: Prefix) -> Option<&PrefixEntry> {
        self.rows.get(&prefix).and_then(|row| row.values().next())
    }

    /// One winning entry per prefix, in prefix order.
    pub fn winners(&self) -> Vec<PrefixEntry> {
        self.rows
            .values()
            .filter_map(|row| row.values().next().cloned())
            .collect()
    }

    /// Winning entries as a map keyed by prefix.
    pub fn winners_by_prefix(&self) -> BTreeMap<Prefix, PrefixEntry> {
        self.rows
            .iter()
            .filter_map(|(prefix, row)| row.values().next().map(|e| (*prefix, e.clone())))
            .collect()
    }

    /// Every contribution of the given client, in prefix order.
    pub fn by_type(&self, prefix_type: PrefixType) -> Vec<PrefixEntry> {
        self.rows
            .values()
            .filter_map(|row| row.get(&prefix_type).cloned())
            .collect()
    }

    /// Every contribution across all clients, in prefix order.
    pub fn all_entries(&self) -> impl Iterator<Item = &PrefixEntry> {
        self.rows.values().flat_map(|row| row.values())
    }

    /// Number of prefixes with at least one contribution.
    pub fn prefix_count(&self) -> usize {
        self.rows.len()
    }

    /// Total number of `(prefix, client)` contributions.
    pub fn contribution_count(&self) -> usize {
        self.rows.values().map(|row| row.len()).sum()
    }

    /// Check for emptiness.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Default for OriginTable {
    fn default() -> Self {
        Self::new()
    }
}
