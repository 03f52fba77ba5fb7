//! Durable configuration store.
//!
//! An opaque blob-keyed map persisted as a single bincode file. The
//! prefix manager keeps exactly one record here (the non-ephemeral
//! snapshot), and tests observe write behavior through
//! [`ConfigStore::num_writes_to_disk`]: the counter reflects physical
//! writes only, which is how the snapshot dirty-filter is verified.

use crate::core::config::Config;
use crate::core::error::TrellisResult;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Durable blob-keyed map.
pub trait ConfigStore: Send + Sync {
    /// Read a record; `None` when absent.
    fn load(&self, key: &str) -> TrellisResult<Option<Bytes>>;

    /// Write a record, returning after commit.
    fn store(&self, key: &str, value: Bytes) -> TrellisResult<()>;

    /// Remove a record.
    fn erase(&self, key: &str) -> TrellisResult<()>;

    /// Number of physical writes performed since open.
    fn num_writes_to_disk(&self) -> u64;
}

/// File-backed config store.
///
/// The whole map is rewritten on every mutation; records here are small
/// and rare, so a single-blob file keeps recovery trivial.
pub struct FileConfigStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl FileConfigStore {
    /// Open the store at its configured location, creating the storage
    /// directory if needed.
    pub fn from_config(config: &Config) -> TrellisResult<Self> {
        let path = config.config_store_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        Self::open(path)
    }

    /// Open the store, loading existing records.
    ///
    /// A missing file is first boot; an undecodable file is discarded
    /// with a warning, which is equivalent to first boot.
    pub fn open(path: impl AsRef<Path>) -> TrellisResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::read(&path) {
            Ok(raw) => match bincode::deserialize(&raw) {
                Ok(records) => records,
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        %error,
                        "config store file undecodable, starting empty"
                    );
                    BTreeMap::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(error.into()),
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
            writes: AtomicU64::new(0),
        })
    }

    fn write_to_disk(&self, records: &BTreeMap<String, Vec<u8>>) -> TrellisResult<()> {
        let raw = bincode::serialize(records)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))?;
        let mut file = std::io::BufWriter::new(std::fs::File::create(&self.path)?);
        file.write_all(&raw)?;
        file.flush()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self, key: &str) -> TrellisResult<Option<Bytes>> {
        Ok(self
            .records
            .lock()
            .get(key)
            .map(|raw| Bytes::from(raw.clone())))
    }

    fn store(&self, key: &str, value: Bytes) -> TrellisResult<()> {
        let mut records = self.records.lock();
        records.insert(key.to_string(), value.to_vec());
        self.write_to_disk(&records)
    }

    fn erase(&self, key: &str) -> TrellisResult<()> {
        let mut records = self.records.lock();
        if records.remove(key).is_some() {
            self.write_to_disk(&records)?;
        }
        Ok(())
    }

    fn num_writes_to_disk(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Memory-backed config store for tests that only need counter semantics.
#[derive(Default)]
pub struct MemoryConfigStore {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl MemoryConfigStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, key: &str) -> TrellisResult<Option<Bytes>> {
        Ok(self
            .records
            .lock()
            .get(key)
            .map(|raw| Bytes::from(raw.clone())))
    }

    fn store(&self, key: &str, value: Bytes) -> TrellisResult<()> {
        self.records.lock().insert(key.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn erase(&self, key: &str) -> TrellisResult<()> {
        if self.records.lock().remove(key).is_some() {
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn num_writes_to_disk(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}
