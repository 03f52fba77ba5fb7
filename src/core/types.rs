//! Prefix origination data model.
//!
//! The types here flow through every layer: clients contribute
//! [`PrefixEntry`] records into the origin table, the publication engine
//! projects winning entries into [`PrefixDatabase`] records, and those are
//! bincode-encoded into replicated-store values.

use crate::core::error::{TrellisError, TrellisResult};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

/// An IP network: address plus prefix length.
///
/// Ordering is total (address family, then address, then length) so tables
/// keyed by prefix iterate deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Prefix {
    /// Network address (IPv4 or IPv6).
    pub addr: IpAddr,

    /// Prefix length in bits.
    pub prefix_len: u8,
}

impl Prefix {
    /// Create a new prefix, validating the length against the address family.
    pub fn new(addr: IpAddr, prefix_len: u8) -> TrellisResult<Self> {
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(TrellisError::MalformedPrefix {
                value: format!("{}/{}", addr, prefix_len),
            });
        }
        Ok(Self { addr, prefix_len })
    }
}

impl std::fmt::Display for Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Prefix {
    type Err = TrellisError;

    fn from_str(s: &str) -> TrellisResult<Self> {
        let malformed = || TrellisError::MalformedPrefix {
            value: s.to_string(),
        };
        let (addr, len) = s.split_once('/').ok_or_else(malformed)?;
        let addr: IpAddr = addr.parse().map_err(|_| malformed())?;
        let prefix_len: u8 = len.parse().map_err(|_| malformed())?;
        Self::new(addr, prefix_len).map_err(|_| malformed())
    }
}

/// A prefix-contributing client.
///
/// The numeric tag is the arbitration priority: when multiple clients
/// contribute an entry for the same prefix, the entry whose client carries
/// the **lowest** tag wins. Tags are part of the on-disk and on-wire
/// encoding and must never be reassigned.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PrefixType {
    /// Node loopback address origination.
    Loopback = 1,
    /// Statically configured origination.
    Default = 2,
    /// Routes learned from BGP peering.
    Bgp = 3,
    /// Addresses leased by the prefix allocator.
    PrefixAllocator = 4,
}

impl PrefixType {
    /// Arbitration priority; lower wins.
    pub const fn priority(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for PrefixType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Loopback => "loopback",
            Self::Default => "default",
            Self::Bgp => "bgp",
            Self::PrefixAllocator => "prefix-allocator",
        };
        write!(f, "{}", name)
    }
}

/// How traffic toward an advertised prefix is forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PrefixForwardingType {
    /// Plain IP forwarding.
    #[default]
    Ip,
    /// Label-switched forwarding.
    Mpls,
}

/// Path selection algorithm announced with the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PrefixForwardingAlgorithm {
    /// Shortest path with equal-cost multipath.
    #[default]
    SpEcmp,
    /// K-shortest-path two-edge-disjoint.
    KspTwoEd,
}

/// One client's contribution for one prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixEntry {
    /// The advertised network.
    pub prefix: Prefix,

    /// Contributing client; arbitration key within a prefix.
    pub prefix_type: PrefixType,

    /// Opaque client payload carried through unmodified.
    pub data: Bytes,

    /// Forwarding mode announced with the prefix.
    pub forwarding_type: PrefixForwardingType,

    /// Path selection algorithm announced with the prefix.
    pub forwarding_algorithm: PrefixForwardingAlgorithm,

    /// Ephemeral entries are never written to the durable snapshot and
    /// do not survive a restart.
    pub ephemeral: bool,
}

impl PrefixEntry {
    /// Create a persistent entry with default forwarding attributes.
    pub fn new(prefix: Prefix, prefix_type: PrefixType) -> Self {
        Self {
            prefix,
            prefix_type,
            data: Bytes::new(),
            forwarding_type: PrefixForwardingType::default(),
            forwarding_algorithm: PrefixForwardingAlgorithm::default(),
            ephemeral: false,
        }
    }

    /// Set the ephemeral flag.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.ephemeral = ephemeral;
        self
    }

    /// Set the opaque client payload.
    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = data;
        self
    }

    /// Entry used in a delete-marker when the last-published entry is no
    /// longer known; carries only the prefix.
    pub fn withdraw_marker(prefix: Prefix) -> Self {
        Self::new(prefix, PrefixType::Default)
    }
}

/// A single performance measurement event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfEvent {
    /// Event label, e.g. `UPDATE_KVSTORE_THROTTLED`.
    pub event: String,

    /// Node that recorded the event.
    pub node_name: String,

    /// Wall-clock timestamp in milliseconds since the unix epoch.
    pub unix_ts_ms: u64,
}

/// Ordered performance event trace attached to a publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfEvents {
    /// Events in recording order.
    pub events: Vec<PerfEvent>,
}

impl PerfEvents {
    /// Record an event with the current wall-clock time.
    pub fn record(&mut self, event: impl Into<String>, node_name: impl Into<String>) {
        let unix_ts_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.events.push(PerfEvent {
            event: event.into(),
            node_name: node_name.into(),
            unix_ts_ms,
        });
    }

    /// Single-event trace helper.
    pub fn with_event(event: impl Into<String>, node_name: impl Into<String>) -> Self {
        let mut events = Self::default();
        events.record(event, node_name);
        events
    }
}

/// The record published into the replicated store.
///
/// In per-prefix-key mode `prefix_entries` carries exactly one entry (or,
/// for a withdrawal, the last-known entry with `delete_prefix` set). In
/// legacy single-key mode it carries every winning entry for the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixDatabase {
    /// Originating node.
    pub node_name: String,

    /// Advertised entries.
    pub prefix_entries: Vec<PrefixEntry>,

    /// Withdrawal marker; peers drop the prefix and let the key age out.
    pub delete_prefix: bool,

    /// Optional performance trace.
    pub perf_events: Option<PerfEvents>,

    /// Announcement keyspace scope.
    pub area: String,
}

impl PrefixDatabase {
    /// Serialize into a replicated-store value.
    pub fn encode(&self) -> TrellisResult<Bytes> {
        let raw = bincode::serialize(self).map_err(|_| TrellisError::Deserialization {
            context: "prefix database",
        })?;
        Ok(Bytes::from(raw))
    }

    /// Deserialize from a replicated-store value.
    pub fn decode(bytes: &[u8]) -> TrellisResult<Self> {
        bincode::deserialize(bytes).map_err(|_| TrellisError::Deserialization {
            context: "prefix database",
        })
    }

    /// Compare advertised content, ignoring the perf trace.
    ///
    /// Two publications that differ only in their perf timestamps carry
    /// the same routing information.
    pub fn same_content(&self, other: &Self) -> bool {
        self.node_name == other.node_name
            && self.area == other.area
            && self.delete_prefix == other.delete_prefix
            && self.prefix_entries == other.prefix_entries
    }
}
