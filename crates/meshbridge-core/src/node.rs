//! Node identifiers and public-key prefix helpers
//!
//! Both networks address nodes with 32-bit ids. On the key-addressed network
//! the id is not transmitted with every message; instead frames carry a hex
//! prefix of the sender's public key, and the leading 4 bytes of that key are
//! the node id.

use crate::error::{CoreError, Result};

/// 32-bit node identifier
pub type NodeId = u32;

/// Destination id meaning "every node"
pub const BROADCAST_NODE_ID: NodeId = 0xFFFF_FFFF;

/// Sentinel for a sender whose identity could not be resolved
pub const UNKNOWN_NODE_ID: NodeId = 0;

/// Hex length of the key prefix used for contact lookups (6 bytes)
pub const LOOKUP_PREFIX_HEX_LEN: usize = 12;

/// Hex length consumed when deriving a node id from a key prefix (4 bytes)
pub const DERIVATION_HEX_LEN: usize = 8;

/// Check for the unknown-sender sentinel
pub fn is_unknown(id: NodeId) -> bool {
    id == UNKNOWN_NODE_ID
}

/// Check for the broadcast destination
pub fn is_broadcast(id: NodeId) -> bool {
    id == BROADCAST_NODE_ID
}

/// Render a node id the way radio firmware shows it (`!143bcd7f`)
pub fn format_node_id(id: NodeId) -> String {
    format!("!{:08x}", id)
}

/// Parse a node id written as decimal, `0x`-prefixed hex or `!`-prefixed hex
pub fn parse_node_id(input: &str) -> Result<NodeId> {
    let s = input.trim();
    let parsed = if let Some(hex) = s.strip_prefix('!') {
        u32::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse::<u32>()
    };
    parsed.map_err(|_| CoreError::InvalidNodeId(input.to_string()))
}

/// Normalize a public key prefix to lowercase hex without separators
pub fn normalize_key_prefix(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let cleaned: String = trimmed
        .chars()
        .filter(|c| *c != ':' && *c != ' ')
        .collect::<String>()
        .to_ascii_lowercase();

    if cleaned.is_empty() {
        return Err(CoreError::InvalidKeyPrefix {
            prefix: input.to_string(),
            reason: "empty".to_string(),
        });
    }
    if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CoreError::InvalidKeyPrefix {
            prefix: input.to_string(),
            reason: "not hex".to_string(),
        });
    }
    Ok(cleaned)
}

/// Key used by the fast lookup table: the first 6 bytes of the key as hex.
///
/// Returns `None` when the prefix is shorter than the lookup length.
pub fn lookup_key(prefix_hex: &str) -> Option<&str> {
    prefix_hex.get(..LOOKUP_PREFIX_HEX_LEN)
}

/// Derive a node id from the first 8 hex characters of a key prefix.
///
/// `"143bcd7f1b1f"` yields `0x143bcd7f`. Derivations that collide with the
/// unknown or broadcast sentinels are rejected.
pub fn derive_node_id(prefix_hex: &str) -> Option<NodeId> {
    let head = prefix_hex.get(..DERIVATION_HEX_LEN)?;
    let id = u32::from_str_radix(head, 16).ok()?;
    if is_unknown(id) || is_broadcast(id) {
        return None;
    }
    Some(id)
}

/// Node id carried by a full (or partial) public key
pub fn node_id_from_public_key(key: &[u8]) -> Option<NodeId> {
    let head: [u8; 4] = key.get(..4)?.try_into().ok()?;
    let id = u32::from_be_bytes(head);
    if is_unknown(id) || is_broadcast(id) {
        return None;
    }
    Some(id)
}
