//! Configuration parsing and validation.
//!
//! Trellis configuration is loaded from TOML files. The contractual
//! constants below are the defaults for the tunable fields; components
//! receive them through the [`Config`] record handed to the prefix
//! manager at construction, never through process-wide state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Coalescing window for replicated-store publication bursts.
pub const KV_THROTTLE_TIMEOUT: Duration = Duration::from_millis(250);

/// Default TTL for published keys when `key_ttl_ms` is unset.
pub const KV_STORE_DB_TTL: Duration = Duration::from_secs(300);

/// Leading marker shared by every prefix key in the replicated store.
pub const PREFIX_DB_MARKER: &str = "prefix:";

/// Default announcement area.
pub const DEFAULT_AREA: &str = "0";

/// Durable-store key under which the prefix snapshot is persisted.
pub const SNAPSHOT_STORE_KEY: &str = "prefix-manager-config";

/// Top-level Trellis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Node identity.
    pub node: NodeConfig,

    /// Advertisement behavior.
    #[serde(default)]
    pub advertise: AdvertiseConfig,

    /// Replicated-store interaction tuning.
    #[serde(default)]
    pub kvstore: KvStoreConfig,

    /// Filesystem paths.
    #[serde(default)]
    pub paths: PathConfig,
}

/// Node identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Name this node originates keys under.
    pub name: String,

    /// Announcement keyspace scope.
    #[serde(default = "default_area")]
    pub area: String,
}

/// Advertisement behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseConfig {
    /// One store key per prefix; when false, a single key carries the
    /// node's whole database.
    #[serde(default = "default_true")]
    pub per_prefix_keys: bool,

    /// Initial delay before the first publication, giving neighbors time
    /// to synchronize. Zero publishes after the first throttle window.
    #[serde(default)]
    pub hold_time_ms: u64,

    /// Attach a perf-event trace to every publication.
    #[serde(default)]
    pub perf_measurement: bool,
}

impl Default for AdvertiseConfig {
    fn default() -> Self {
        Self {
            per_prefix_keys: true,
            hold_time_ms: 0,
            perf_measurement: false,
        }
    }
}

/// Replicated-store interaction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvStoreConfig {
    /// Publication coalescing window in milliseconds.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,

    /// TTL applied to published keys, in milliseconds. Owned keys are
    /// refreshed at half this interval; withdrawn keys age out.
    #[serde(default = "default_key_ttl_ms")]
    pub key_ttl_ms: u64,

    /// Period of the reconciliation sweep that re-asserts owned keys the
    /// store has lost or overwritten, in milliseconds.
    #[serde(default = "default_sync_interval_ms")]
    pub sync_interval_ms: u64,
}

impl Default for KvStoreConfig {
    fn default() -> Self {
        Self {
            throttle_ms: default_throttle_ms(),
            key_ttl_ms: default_key_ttl_ms(),
            sync_interval_ms: default_sync_interval_ms(),
        }
    }
}

/// Filesystem path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Directory holding the durable config store.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_storage_dir() -> String {
    "data".to_string()
}

fn default_area() -> String {
    DEFAULT_AREA.to_string()
}

fn default_throttle_ms() -> u64 {
    KV_THROTTLE_TIMEOUT.as_millis() as u64
}

fn default_key_ttl_ms() -> u64 {
    KV_STORE_DB_TTL.as_millis() as u64
}

fn default_sync_interval_ms() -> u64 {
    60_000
}

/// Check a node or area name for use inside store keys.
///
/// The key codec reserves `:`, `[` and `]`; names are restricted to the
/// characters that keep decoding unambiguous.
pub fn is_valid_key_component(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

impl Config {
    /// Minimal configuration for the given node with all defaults.
    pub fn for_node(name: impl Into<String>) -> Self {
        Self {
            node: NodeConfig {
                name: name.into(),
                area: default_area(),
            },
            advertise: AdvertiseConfig::default(),
            kvstore: KvStoreConfig::default(),
            paths: PathConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_key_component(&self.node.name) {
            anyhow::bail!(
                "node name {:?} must be non-empty alphanumeric with '.', '-' or '_'",
                self.node.name
            );
        }
        if !is_valid_key_component(&self.node.area) {
            anyhow::bail!(
                "area {:?} must be non-empty alphanumeric with '.', '-' or '_'",
                self.node.area
            );
        }
        if self.kvstore.throttle_ms == 0 {
            anyhow::bail!("kvstore throttle_ms must be > 0");
        }
        if self.kvstore.key_ttl_ms == 0 {
            anyhow::bail!("kvstore key_ttl_ms must be > 0");
        }
        if self.kvstore.sync_interval_ms == 0 {
            anyhow::bail!("kvstore sync_interval_ms must be > 0");
        }
        if self.paths.storage_dir.is_empty() {
            anyhow::bail!("paths storage_dir must be non-empty");
        }
        Ok(())
    }

    /// Initial publication hold.
    pub fn hold_time(&self) -> Duration {
        Duration::from_millis(self.advertise.hold_time_ms)
    }

    /// Publication coalescing window.
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.kvstore.throttle_ms)
    }

    /// TTL applied to published keys.
    pub fn key_ttl(&self) -> Duration {
        Duration::from_millis(self.kvstore.key_ttl_ms)
    }

    /// Reconciliation sweep period.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.kvstore.sync_interval_ms)
    }

    /// Location of the durable config-store file.
    pub fn config_store_path(&self) -> PathBuf {
        Path::new(&self.paths.storage_dir).join("config-store.bin")
    }
}
