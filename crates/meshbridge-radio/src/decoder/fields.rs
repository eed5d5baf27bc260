//! Library events and field-name normalization
//!
//! Transport libraries have renamed the same attribute several times across
//! releases (`from_id`, `fromId`, `sender`, ...). Each logical field has an
//! ordered list of candidate keys; the first key holding a non-empty value
//! wins. New variants are added to the tables without touching the
//! resolution logic.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use meshbridge_core::node::{normalize_key_prefix, parse_node_id};
use meshbridge_core::NodeId;

/// Event delivered by a transport library as a loosely-typed object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LibraryEvent(pub Map<String, Value>);

impl LibraryEvent {
    /// Build from any JSON value; non-objects yield `None`
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Set a field
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// First non-empty value among the candidate keys
    pub fn first<'a>(&'a self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|k| self.0.get(*k))
            .find(|v| !is_empty(v))
    }

    /// First candidate rendered as text (strings as-is, numbers formatted)
    pub fn first_str(&self, keys: &[&str]) -> Option<String> {
        self.first(keys).and_then(|v| match v {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    /// First candidate as an integer (numbers or numeric strings)
    pub fn first_i64(&self, keys: &[&str]) -> Option<i64> {
        self.first(keys).and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    /// First candidate as a float
    pub fn first_f64(&self, keys: &[&str]) -> Option<f64> {
        self.first(keys).and_then(|v| match v {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Candidate keys per logical field, highest priority first
#[derive(Debug, Clone, Copy)]
pub struct FieldAliases {
    pub sender_id: &'static [&'static str],
    pub key_prefix: &'static [&'static str],
    pub destination: &'static [&'static str],
    pub text: &'static [&'static str],
    pub channel: &'static [&'static str],
    pub snr: &'static [&'static str],
    pub rssi: &'static [&'static str],
    pub hops: &'static [&'static str],
    pub event_type: &'static [&'static str],
    pub packet_id: &'static [&'static str],
}

impl FieldAliases {
    /// Known variants across library releases
    pub const DEFAULT: FieldAliases = FieldAliases {
        sender_id: &["from_id", "fromId", "from", "sender_id", "sender", "src"],
        key_prefix: &["pubkey_prefix", "public_key_prefix", "sender_pubkey", "pubkey"],
        destination: &["to_id", "toId", "to", "dest", "destination"],
        text: &["text", "message", "msg"],
        channel: &["channel_idx", "channel", "channelIndex"],
        snr: &["snr", "SNR", "rx_snr"],
        rssi: &["rssi", "RSSI", "rx_rssi"],
        hops: &["path_len", "hops", "hop_count"],
        event_type: &["type", "event_type", "kind"],
        packet_id: &["packet_id", "id"],
    };

    /// Sender node id, when a candidate parses as one
    pub fn sender_id(&self, event: &LibraryEvent) -> Option<NodeId> {
        node_id_field(event, self.sender_id)
    }

    /// Destination node id
    pub fn destination(&self, event: &LibraryEvent) -> Option<NodeId> {
        node_id_field(event, self.destination)
    }

    /// Sender key prefix as normalized lowercase hex
    pub fn key_prefix(&self, event: &LibraryEvent) -> Option<String> {
        let raw = event.first_str(self.key_prefix)?;
        normalize_key_prefix(&raw).ok()
    }
}

impl Default for FieldAliases {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Node ids arrive as numbers, decimal strings, `0x`-hex or `!`-hex.
///
/// Candidates that do not parse are skipped rather than ending the search.
fn node_id_field(event: &LibraryEvent, keys: &[&str]) -> Option<NodeId> {
    keys.iter().filter_map(|k| event.0.get(*k)).find_map(|v| match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) if !s.trim().is_empty() => parse_node_id(s).ok(),
        _ => None,
    })
}
