//! Store interfaces.
//!
//! The prefix manager talks to two stores, both consumed behind traits:
//! - [`kv`] - the replicated key-value store (gossip keyspace with
//!   per-key version and TTL), plus [`memory`], the in-process client
//! - [`persistent`] - the durable blob-keyed config store
//! - [`keys`] - the codec mapping `(node, prefix, area)` onto flat keys

pub mod keys;
pub mod kv;
pub mod memory;
pub mod persistent;

// Re-exports for convenience
pub use keys::{legacy_node_key, KeyScope, PrefixKey};
pub use kv::{KeyUpdate, KvStore};
pub use memory::MemoryKvStore;
pub use persistent::{ConfigStore, FileConfigStore, MemoryConfigStore};
