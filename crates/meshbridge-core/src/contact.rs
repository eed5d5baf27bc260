//! Known remote nodes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;
use crate::location::Location;
use crate::network::NetworkId;
use crate::node::{NodeId, LOOKUP_PREFIX_HEX_LEN};

/// How a contact entered the cache
///
/// Ordered by data quality: a richer source is never replaced by a poorer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactSource {
    /// Created from a key prefix alone
    Derived,
    /// Learned from an over-the-air advertisement
    Advert,
    /// Learned from the radio's full contact list / node database
    Synced,
}

impl ContactSource {
    /// Storage label
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactSource::Derived => "derived",
            ContactSource::Advert => "advert",
            ContactSource::Synced => "synced",
        }
    }
}

impl fmt::Display for ContactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "derived" => Ok(ContactSource::Derived),
            "advert" => Ok(ContactSource::Advert),
            "synced" => Ok(ContactSource::Synced),
            other => Err(CoreError::Internal(format!("unknown contact source {other}"))),
        }
    }
}

/// A known remote node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Network the contact lives on
    pub network: NetworkId,
    /// Node id
    pub node_id: NodeId,
    /// Human-readable name, if known
    pub display_name: Option<String>,
    /// Public key bytes (0-32, possibly only a prefix)
    #[serde(with = "hex_bytes")]
    pub public_key: Vec<u8>,
    /// Last reported position
    pub position: Option<Location>,
    /// First sighting
    pub first_seen: DateTime<Utc>,
    /// Most recent sighting
    pub last_seen: DateTime<Utc>,
    /// Provenance
    pub source: ContactSource,
}

impl Contact {
    /// Create a contact first seen now
    pub fn new(network: NetworkId, node_id: NodeId, source: ContactSource) -> Self {
        let now = Utc::now();
        Self {
            network,
            node_id,
            display_name: None,
            public_key: Vec::new(),
            position: None,
            first_seen: now,
            last_seen: now,
            source,
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.display_name = (!name.trim().is_empty()).then(|| name.trim().to_string());
        self
    }

    /// Set the public key (or key prefix)
    pub fn with_public_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.public_key = key.into();
        self
    }

    /// Set the position
    pub fn with_position(mut self, position: Location) -> Self {
        self.position = Some(position);
        self
    }

    /// Lowercase hex of the whole known key
    pub fn public_key_hex(&self) -> String {
        hex::encode(&self.public_key)
    }

    /// Hex prefix used for fast lookups, when enough key bytes are known
    pub fn lookup_prefix(&self) -> Option<String> {
        let hex = self.public_key_hex();
        (hex.len() >= LOOKUP_PREFIX_HEX_LEN).then(|| hex[..LOOKUP_PREFIX_HEX_LEN].to_string())
    }

    /// Fold a newer sighting of the same node into this entry.
    ///
    /// Keeps the longest key, the newest name and position, the earliest
    /// `first_seen`, the latest `last_seen`, and the best source.
    pub fn merge(&mut self, newer: &Contact) {
        if newer.public_key.len() > self.public_key.len() {
            self.public_key = newer.public_key.clone();
        }
        if newer.display_name.is_some() {
            self.display_name = newer.display_name.clone();
        }
        if newer.position.is_some() {
            self.position = newer.position;
        }
        self.first_seen = self.first_seen.min(newer.first_seen);
        self.last_seen = self.last_seen.max(newer.last_seen);
        self.source = self.source.max(newer.source);
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derived() -> Contact {
        Contact::new(NetworkId::MeshCore, 0x143bcd7f, ContactSource::Derived)
            .with_public_key(hex::decode("143bcd7f1b1f").unwrap())
    }

    #[test]
    fn test_merge_never_downgrades_source() {
        let mut synced = Contact::new(NetworkId::MeshCore, 0x143bcd7f, ContactSource::Synced)
            .with_name("Ridge Repeater");
        synced.merge(&derived());
        assert_eq!(synced.source, ContactSource::Synced);
        assert_eq!(synced.display_name.as_deref(), Some("Ridge Repeater"));
        assert_eq!(synced.public_key_hex(), "143bcd7f1b1f");
    }

    #[test]
    fn test_merge_upgrades_derived() {
        let mut contact = derived();
        let full_key = hex::decode(format!("143bcd7f1b1f{}", "ab".repeat(26))).unwrap();
        let synced = Contact::new(NetworkId::MeshCore, 0x143bcd7f, ContactSource::Synced)
            .with_public_key(full_key.clone());
        contact.merge(&synced);
        assert_eq!(contact.source, ContactSource::Synced);
        assert_eq!(contact.public_key, full_key);
    }

    #[test]
    fn test_lookup_prefix() {
        assert_eq!(derived().lookup_prefix().as_deref(), Some("143bcd7f1b1f"));
        let short = Contact::new(NetworkId::MeshCore, 1, ContactSource::Derived)
            .with_public_key(vec![0x14, 0x3b]);
        assert!(short.lookup_prefix().is_none());
    }

    #[test]
    fn test_blank_name_ignored() {
        let c = Contact::new(NetworkId::Meshtastic, 7, ContactSource::Synced).with_name("  ");
        assert!(c.display_name.is_none());
    }

    #[test]
    fn test_source_round_trip_labels() {
        for source in [ContactSource::Derived, ContactSource::Advert, ContactSource::Synced] {
            assert_eq!(source.as_str().parse::<ContactSource>().unwrap(), source);
        }
    }
}
