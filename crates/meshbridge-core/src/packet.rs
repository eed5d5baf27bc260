//! Network-agnostic packet model
//!
//! Every frame read from either network is normalized into a [`Packet`]
//! before it reaches the router. Packets whose payload type is not understood
//! keep their raw bytes and are still delivered.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::network::NetworkId;
use crate::node::{self, NodeId, BROADCAST_NODE_ID, UNKNOWN_NODE_ID};

/// Kind of payload carried by a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    /// Plain text message
    TextMessage,
    /// Device or environment telemetry
    Telemetry,
    /// Routing, path or trace control traffic
    Routing,
    /// Position report
    Position,
    /// Node information / user record
    NodeInfo,
    /// Self-advertisement carrying a public key
    Advert,
    /// Delivery acknowledgement
    Ack,
    /// Payload we cannot decrypt
    Encrypted,
    /// Type tag with no known decoding
    Unknown(u32),
}

impl PayloadKind {
    /// Whether the type tag was not recognized
    pub fn is_unknown(&self) -> bool {
        matches!(self, PayloadKind::Unknown(_))
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadKind::TextMessage => write!(f, "text"),
            PayloadKind::Telemetry => write!(f, "telemetry"),
            PayloadKind::Routing => write!(f, "routing"),
            PayloadKind::Position => write!(f, "position"),
            PayloadKind::NodeInfo => write!(f, "nodeinfo"),
            PayloadKind::Advert => write!(f, "advert"),
            PayloadKind::Ack => write!(f, "ack"),
            PayloadKind::Encrypted => write!(f, "encrypted"),
            PayloadKind::Unknown(tag) => write!(f, "unknown(0x{:02x})", tag),
        }
    }
}

/// Decoded packet body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// UTF-8 text
    Text(String),
    /// Undecoded bytes
    Bytes(Bytes),
    /// Nothing beyond the header
    Empty,
}

impl Payload {
    /// Text content, if this is a text payload
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Size of the body in bytes
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Bytes(bytes) => bytes.len(),
            Payload::Empty => 0,
        }
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Radio-level reception metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RfMetrics {
    /// Received signal strength in dBm
    pub rssi: Option<i32>,
    /// Signal-to-noise ratio in dB
    pub snr: Option<f32>,
    /// Hops travelled before reaching us
    pub hop_count: Option<u8>,
}

/// Reception timestamp in both clocks
#[derive(Debug, Clone, Copy)]
pub struct ReceivedAt {
    /// Monotonic instant, used for silence and dedup windows
    pub monotonic: Instant,
    /// Wall-clock time, used for logs and storage
    pub wall: DateTime<Utc>,
}

impl ReceivedAt {
    /// Capture the current time
    pub fn now() -> Self {
        Self {
            monotonic: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// Which step of the identity cascade produced `from_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionOutcome {
    /// A sender-id field was present on the frame
    Direct,
    /// The key prefix matched a known contact
    ContactCache,
    /// The id was derived from the key prefix
    Derived,
    /// Nothing worked; `from_id` is the unknown sentinel
    #[default]
    Unresolved,
}

impl fmt::Display for ResolutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolutionOutcome::Direct => "direct",
            ResolutionOutcome::ContactCache => "contact_cache",
            ResolutionOutcome::Derived => "derived",
            ResolutionOutcome::Unresolved => "unresolved",
        };
        f.write_str(s)
    }
}

/// Dispatch shape of a packet, computed once after decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageShape {
    /// Text addressed to one node
    DirectMessage,
    /// Text sent to a channel
    BroadcastMessage,
    /// Anything that is not a text message
    UnknownPayload,
}

/// One decoded unit of radio traffic
#[derive(Debug, Clone)]
pub struct Packet {
    /// Network the packet arrived on
    pub network: NetworkId,
    /// Sender node id (`UNKNOWN_NODE_ID` when unresolved)
    pub from_id: NodeId,
    /// Destination node id (`BROADCAST_NODE_ID` for broadcasts)
    pub to_id: NodeId,
    /// Channel index, 0 = public/default
    pub channel: u8,
    /// Payload type
    pub kind: PayloadKind,
    /// Payload body
    pub payload: Payload,
    /// Reception metrics, when the radio reported them
    pub rf: Option<RfMetrics>,
    /// Reception time
    pub received_at: ReceivedAt,
    /// Broadcast flag, from `to_id` or route-type flags
    pub is_broadcast: bool,
    /// Lowercase hex prefix of the sender's public key, when carried
    pub sender_key_prefix: Option<String>,
    /// How `from_id` was obtained
    pub resolution: ResolutionOutcome,
    /// Radio-assigned packet id, when present
    pub packet_id: Option<u32>,
    /// Delivered to us as a direct message by our own radio, whatever `to_id` says
    pub addressed_to_local: bool,
}

impl Packet {
    /// Create a broadcast packet from an unknown sender; refine with the builders
    pub fn new(network: NetworkId, kind: PayloadKind, payload: Payload) -> Self {
        Self {
            network,
            from_id: UNKNOWN_NODE_ID,
            to_id: BROADCAST_NODE_ID,
            channel: 0,
            kind,
            payload,
            rf: None,
            received_at: ReceivedAt::now(),
            is_broadcast: true,
            sender_key_prefix: None,
            resolution: ResolutionOutcome::Unresolved,
            packet_id: None,
            addressed_to_local: false,
        }
    }

    /// Convenience constructor for a text packet
    pub fn text(network: NetworkId, text: impl Into<String>) -> Self {
        Self::new(network, PayloadKind::TextMessage, Payload::Text(text.into()))
    }

    /// Set a directly-known sender
    pub fn with_from(mut self, from_id: NodeId) -> Self {
        self.from_id = from_id;
        self.resolution = if node::is_unknown(from_id) {
            ResolutionOutcome::Unresolved
        } else {
            ResolutionOutcome::Direct
        };
        self
    }

    /// Set the destination; the broadcast flag follows the sentinel
    pub fn with_to(mut self, to_id: NodeId) -> Self {
        self.to_id = to_id;
        self.is_broadcast = node::is_broadcast(to_id);
        self
    }

    /// Direct message our radio received for us; `to_id` may still be
    /// `UNKNOWN_NODE_ID` when the local id is not known yet
    pub fn to_local_node(mut self) -> Self {
        self.addressed_to_local = true;
        self.is_broadcast = false;
        self
    }

    /// Set the channel index
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Attach reception metrics
    pub fn with_rf(mut self, rf: RfMetrics) -> Self {
        self.rf = Some(rf);
        self
    }

    /// Attach the sender's key prefix
    pub fn with_sender_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sender_key_prefix = Some(prefix.into());
        self
    }

    /// Attach the radio packet id
    pub fn with_packet_id(mut self, id: u32) -> Self {
        self.packet_id = Some(id);
        self
    }

    /// Override the reception time
    pub fn with_received_at(mut self, at: ReceivedAt) -> Self {
        self.received_at = at;
        self
    }

    /// Mark as broadcast regardless of `to_id` (route-type flooded)
    pub fn mark_broadcast(mut self, broadcast: bool) -> Self {
        self.is_broadcast = broadcast;
        self
    }

    /// Whether the sender identity is unresolved
    pub fn sender_unknown(&self) -> bool {
        node::is_unknown(self.from_id)
    }

    /// Text body, if any
    pub fn text_body(&self) -> Option<&str> {
        self.payload.as_text()
    }

    /// Dispatch shape
    pub fn shape(&self) -> MessageShape {
        match (self.kind, self.payload.as_text()) {
            (PayloadKind::TextMessage, Some(_)) if self.is_broadcast => {
                MessageShape::BroadcastMessage
            }
            (PayloadKind::TextMessage, Some(_)) => MessageShape::DirectMessage,
            _ => MessageShape::UnknownPayload,
        }
    }
}
