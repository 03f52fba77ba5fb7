//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;` in
//! test files.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use trellis::core::config::{Config, KV_THROTTLE_TIMEOUT};
use trellis::core::types::{Prefix, PrefixDatabase, PrefixEntry, PrefixType};
use trellis::manager::{PrefixManager, PrefixManagerHandle, PrefixUpdateRequest};
use trellis::store::{FileConfigStore, KvStore, MemoryKvStore, PrefixKey};

/// Parse a prefix literal.
pub fn prefix(s: &str) -> Prefix {
    s.parse().expect("test prefix literal")
}

/// Persistent entry for the given prefix and client.
pub fn entry(p: &str, prefix_type: PrefixType) -> PrefixEntry {
    PrefixEntry::new(prefix(p), prefix_type)
}

/// Ephemeral entry for the given prefix and client.
pub fn ephemeral(p: &str, prefix_type: PrefixType) -> PrefixEntry {
    PrefixEntry::new(prefix(p), prefix_type).ephemeral(true)
}

/// The per-prefix store key a node publishes for a prefix.
pub fn store_key(node: &str, p: &str) -> String {
    PrefixKey::new(node, prefix(p), "0")
        .expect("test key components")
        .encode()
}

/// A running manager with its collaborators.
pub struct TestManager {
    pub handle: PrefixManagerHandle,
    pub join: JoinHandle<()>,
    pub intake: mpsc::UnboundedSender<PrefixUpdateRequest>,
    pub kv: Arc<MemoryKvStore>,
    pub config_store: Arc<FileConfigStore>,
}

/// Spawn a manager against fresh in-memory and on-disk stores rooted in
/// the given directory.
pub fn start_manager(mut config: Config, dir: &TempDir) -> TestManager {
    config.paths.storage_dir = dir.path().to_string_lossy().into_owned();
    let config_store = Arc::new(FileConfigStore::from_config(&config).unwrap());
    start_manager_with(config, Arc::new(MemoryKvStore::new()), config_store)
}

/// Spawn a manager against the given stores (restart scenarios).
pub fn start_manager_with(
    config: Config,
    kv: Arc<MemoryKvStore>,
    config_store: Arc<FileConfigStore>,
) -> TestManager {
    let (intake, intake_rx) = mpsc::unbounded_channel();
    let (handle, join) =
        PrefixManager::spawn(config, config_store.clone(), kv.clone(), intake_rx).unwrap();
    TestManager {
        handle,
        join,
        intake,
        kv,
        config_store,
    }
}

/// Default test configuration: per-prefix keys, no hold, perf off.
pub fn test_config(node: &str) -> Config {
    Config::for_node(node)
}

/// Sleep past one throttled publication (paused-time tests advance the
/// clock instantly once the loop goes idle).
pub async fn one_publication() {
    tokio::time::sleep(2 * KV_THROTTLE_TIMEOUT).await;
}

/// Sleep for an explicit duration.
pub async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
}

/// Read and decode a published database plus its version.
pub fn read_db(kv: &MemoryKvStore, key: &str) -> Option<(PrefixDatabase, u64)> {
    let (raw, version) = kv.get_key(key)?;
    Some((PrefixDatabase::decode(&raw).unwrap(), version))
}

/// Collect every live (not delete-marked) entry a node advertises.
pub fn live_entries(kv: &MemoryKvStore, node: &str) -> Vec<PrefixEntry> {
    let scan = format!("prefix:{}:", node);
    kv.dump_all_with_prefix(&scan)
        .into_iter()
        .filter_map(|(_, raw): (String, Bytes)| PrefixDatabase::decode(&raw).ok())
        .filter(|db| !db.delete_prefix)
        .flat_map(|db| db.prefix_entries)
        .collect()
}
