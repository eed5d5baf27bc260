//! Logical network identifiers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// One of the two mesh networks bridged by this system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// Protobuf-framed mesh reached over serial or TCP (network A)
    Meshtastic,
    /// Companion-radio binary framing with key-addressed contacts (network B)
    MeshCore,
}

impl NetworkId {
    /// Both networks, in a stable order
    pub const ALL: [NetworkId; 2] = [NetworkId::Meshtastic, NetworkId::MeshCore];

    /// Short lowercase label used in log lines and storage
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::Meshtastic => "meshtastic",
            NetworkId::MeshCore => "meshcore",
        }
    }

    /// Whether outbound direct messages are addressed by contact public key
    /// rather than by numeric node id
    pub fn uses_key_addressing(&self) -> bool {
        matches!(self, NetworkId::MeshCore)
    }

    /// Whether a node id is the leading 4 bytes of the node's public key
    pub fn derives_node_id_from_key(&self) -> bool {
        matches!(self, NetworkId::MeshCore)
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "meshtastic" | "a" => Ok(NetworkId::Meshtastic),
            "meshcore" | "b" => Ok(NetworkId::MeshCore),
            other => Err(CoreError::UnknownNetwork(other.to_string())),
        }
    }
}
