//! Prefix key codec.
//!
//! Every key this node writes into the replicated store starts with the
//! shared [`PREFIX_DB_MARKER`], letting peers discover all prefix
//! announcements with one prefix scan. Two encodings exist:
//!
//! - per-prefix: `prefix:<node>:<area>:[<address>/<length>]`
//! - legacy:     `prefix:<node>` (one key carrying the whole database)
//!
//! Node and area names are restricted to characters that keep decoding
//! unambiguous, so `decode(encode(k)) == k` and distinct inputs encode to
//! distinct keys.

use crate::core::config::{is_valid_key_component, PREFIX_DB_MARKER};
use crate::core::error::{TrellisError, TrellisResult};
use crate::core::types::Prefix;

/// A decoded per-prefix store key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PrefixKey {
    node: String,
    prefix: Prefix,
    area: String,
}

impl PrefixKey {
    /// Create a key, validating node and area names.
    pub fn new(
        node: impl Into<String>,
        prefix: Prefix,
        area: impl Into<String>,
    ) -> TrellisResult<Self> {
        let node = node.into();
        let area = area.into();
        if !is_valid_key_component(&node) || !is_valid_key_component(&area) {
            return Err(TrellisError::MalformedKey {
                key: format!("{}{}:{}", PREFIX_DB_MARKER, node, area),
            });
        }
        Ok(Self { node, prefix, area })
    }

    /// Originating node name.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Advertised prefix.
    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    /// Announcement area.
    pub fn area(&self) -> &str {
        &self.area
    }

    /// Render the flat store key.
    pub fn encode(&self) -> String {
        format!(
            "{}{}:{}:[{}]",
            PREFIX_DB_MARKER, self.node, self.area, self.prefix
        )
    }

    /// Parse a store key produced by [`encode`](Self::encode).
    ///
    /// Fails with `MalformedKey` on anything the codec cannot have
    /// produced: missing marker, wrong field count, unbracketed or
    /// unparseable prefix, or invalid name characters.
    pub fn decode(key: &str) -> TrellisResult<Self> {
        let malformed = || TrellisError::MalformedKey {
            key: key.to_string(),
        };

        let rest = key.strip_prefix(PREFIX_DB_MARKER).ok_or_else(malformed)?;
        let (node, rest) = rest.split_once(':').ok_or_else(malformed)?;
        let rest = rest.strip_suffix(']').ok_or_else(malformed)?;
        let (area, prefix) = rest.split_once(":[").ok_or_else(malformed)?;

        if !is_valid_key_component(node) || !is_valid_key_component(area) {
            return Err(malformed());
        }
        let prefix: Prefix = prefix.parse().map_err(|_| malformed())?;

        Ok(Self {
            node: node.to_string(),
            prefix,
            area: area.to_string(),
        })
    }

    /// Scan prefix matching every per-prefix key the given node owns.
    pub fn node_scope(node: &str) -> String {
        format!("{}{}:", PREFIX_DB_MARKER, node)
    }
}

impl std::fmt::Display for PrefixKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// The single-key-per-node form used when per-prefix keys are disabled.
pub fn legacy_node_key(node: &str) -> String {
    format!("{}{}", PREFIX_DB_MARKER, node)
}

/// A validated `(node, area)` pair that stamps out store keys.
///
/// Validating once at construction lets the publication engine build keys
/// infallibly on its hot path.
#[derive(Debug, Clone)]
pub struct KeyScope {
    node: String,
    area: String,
}

impl KeyScope {
    /// Create a scope, validating both names.
    pub fn new(node: impl Into<String>, area: impl Into<String>) -> TrellisResult<Self> {
        let node = node.into();
        let area = area.into();
        if !is_valid_key_component(&node) || !is_valid_key_component(&area) {
            return Err(TrellisError::MalformedKey {
                key: format!("{}{}:{}", PREFIX_DB_MARKER, node, area),
            });
        }
        Ok(Self { node, area })
    }

    /// Node name of this scope.
    pub fn node(&self) -> &str {
        &self.node
    }

    /// Area of this scope.
    pub fn area(&self) -> &str {
        &self.area
    }

    /// Per-prefix key for the given prefix.
    pub fn key(&self, prefix: Prefix) -> PrefixKey {
        PrefixKey {
            node: self.node.clone(),
            prefix,
            area: self.area.clone(),
        }
    }

    /// Scan prefix matching every per-prefix key of this node.
    pub fn scan_prefix(&self) -> String {
        PrefixKey::node_scope(&self.node)
    }

    /// The node's legacy single key.
    pub fn legacy_key(&self) -> String {
        legacy_node_key(&self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(s: &str) -> Prefix {
        s.parse().unwrap()
    }

    #[test]
    fn encode_shape() {
        let key = PrefixKey::new("node-1", prefix("10.1.1.1/32"), "0").unwrap();
        assert_eq!(key.encode(), "prefix:node-1:0:[10.1.1.1/32]");
    }

    #[test]
    fn roundtrip_v4_and_v6() {
        for p in ["10.1.1.1/32", "::ffff:10.1.1.1/128", "ffff:10:4:9::/64"] {
            let key = PrefixKey::new("node-1", prefix(p), "dc-west.pod_3").unwrap();
            let decoded = PrefixKey::decode(&key.encode()).unwrap();
            assert_eq!(decoded, key);
        }
    }

    #[test]
    fn distinct_inputs_distinct_keys() {
        let a = PrefixKey::new("node-1", prefix("10.0.0.0/8"), "0").unwrap();
        let b = PrefixKey::new("node-1", prefix("10.0.0.0/9"), "0").unwrap();
        let c = PrefixKey::new("node-10", prefix("10.0.0.0/8"), "0").unwrap();
        let d = PrefixKey::new("node-1", prefix("10.0.0.0/8"), "1").unwrap();
        let keys = [a.encode(), b.encode(), c.encode(), d.encode()];
        for (i, x) in keys.iter().enumerate() {
            for y in keys.iter().skip(i + 1) {
                assert_ne!(x, y);
            }
        }
    }

    #[test]
    fn decode_rejects_malformed() {
        for bad in [
            "",
            "node-1:0:[10.0.0.0/8]",
            "prefix:",
            "prefix:node-1",
            "prefix:node-1:0",
            "prefix:node-1:0:10.0.0.0/8",
            "prefix:node-1:0:[10.0.0.0/8",
            "prefix:node-1:0:[10.0.0.0]",
            "prefix:node-1:0:[banana/8]",
            "prefix:node-1:0:[10.0.0.0/99]",
            "prefix:no:de:0:[10.0.0.0/8]",
        ] {
            assert!(
                matches!(
                    PrefixKey::decode(bad),
                    Err(TrellisError::MalformedKey { .. })
                ),
                "expected MalformedKey for {:?}",
                bad
            );
        }
    }

    #[test]
    fn invalid_names_rejected_at_encode() {
        assert!(PrefixKey::new("no:de", prefix("10.0.0.0/8"), "0").is_err());
        assert!(PrefixKey::new("node", prefix("10.0.0.0/8"), "[0]").is_err());
        assert!(PrefixKey::new("", prefix("10.0.0.0/8"), "0").is_err());
    }

    #[test]
    fn legacy_key_shape() {
        assert_eq!(legacy_node_key("node-1"), "prefix:node-1");
        assert_eq!(PrefixKey::node_scope("node-1"), "prefix:node-1:");
    }

    #[test]
    fn scope_stamps_out_keys() {
        let scope = KeyScope::new("node-1", "0").unwrap();
        let key = scope.key(prefix("10.1.1.1/32"));
        assert_eq!(key.encode(), "prefix:node-1:0:[10.1.1.1/32]");
        assert_eq!(scope.scan_prefix(), "prefix:node-1:");
        assert_eq!(scope.legacy_key(), "prefix:node-1");
        assert!(KeyScope::new("no:de", "0").is_err());
    }
}
