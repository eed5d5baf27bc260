//! Protocol decoding
//!
//! Turns raw frames and library events into normalized [`Packet`]s, contact
//! updates and control events. Sender identity is filled in through the
//! [`IdentityResolver`] cascade, so everything past this point can rely on
//! `from_id` being either a real node id or `UNKNOWN_NODE_ID`.
//!
//! Parsing never panics on radio input: malformed frames come out as
//! [`DecodedEvent::Malformed`] and are counted.

pub mod fields;
pub mod identity;
pub mod meshcore;
pub mod meshtastic;
pub mod proto;

pub use fields::{FieldAliases, LibraryEvent};
pub use identity::{IdentityResolver, Resolution, ResolverStats};

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};

use meshbridge_core::node::format_node_id;
use meshbridge_core::{
    Contact, ContactSource, NetworkId, NodeId, Packet, Payload, PayloadKind, RfMetrics,
    BROADCAST_NODE_ID, UNKNOWN_NODE_ID,
};

use crate::error::{BridgeError, Result};
use crate::interface::InboundFrame;
use crate::router::LocalIdentities;

/// Non-traffic notifications from a radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    /// The radio reported its own identity
    LocalNode {
        node_id: NodeId,
        public_key: Vec<u8>,
        name: Option<String>,
    },
    /// Meshtastic config exchange finished
    ConfigComplete(u32),
    /// The radio restarted
    Rebooted,
    /// Messages are queued on the companion radio
    MessagesWaiting,
    /// The companion message queue is drained
    NoMoreMessages,
    ContactsStart { count: u32 },
    ContactsEnd,
    CommandOk,
    CommandError(u8),
    /// A send was accepted; an ack is expected within `timeout_ms`
    Sent { expected_ack: u32, timeout_ms: u32 },
    SendConfirmed { ack_code: u32, round_trip_ms: u32 },
    PathUpdated { key_prefix: String },
    CurrentTime(u32),
}

/// What the decoder produced for one frame
#[derive(Debug, Clone)]
pub enum DecodedEvent {
    /// Mesh traffic, sender resolved
    Packet(Packet),
    /// A contact entry after merging into the cache
    Contact(Contact),
    /// Radio status
    Control(ControlEvent),
    /// The frame could not be parsed
    Malformed { reason: String },
}

/// Per-protocol parse result before identity resolution
#[derive(Debug)]
pub(crate) enum Parsed {
    Packet {
        packet: Packet,
        /// Sender id carried on the frame
        direct: Option<NodeId>,
        /// Contact information carried by the packet itself
        learned: Option<Contact>,
    },
    Contact(Contact),
    Control(ControlEvent),
    /// Valid but not bridged
    Ignored,
}

impl Parsed {
    pub(crate) fn packet(packet: Packet) -> Self {
        Parsed::Packet {
            packet,
            direct: None,
            learned: None,
        }
    }
}

/// Decoder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    pub frames: u64,
    pub packets: u64,
    pub contacts: u64,
    pub control: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub unknown_kinds: u64,
}

#[derive(Debug, Default)]
struct Counters {
    frames: AtomicU64,
    packets: AtomicU64,
    contacts: AtomicU64,
    control: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    unknown_kinds: AtomicU64,
}

/// Decoder for one network
pub struct ProtocolDecoder {
    network: NetworkId,
    resolver: Arc<IdentityResolver>,
    local: Arc<LocalIdentities>,
    aliases: FieldAliases,
    counters: Counters,
}

impl ProtocolDecoder {
    /// Create a decoder sharing the bridge-wide resolver and local identities
    pub fn new(
        network: NetworkId,
        resolver: Arc<IdentityResolver>,
        local: Arc<LocalIdentities>,
    ) -> Self {
        Self {
            network,
            resolver,
            local,
            aliases: FieldAliases::DEFAULT,
            counters: Counters::default(),
        }
    }

    /// Use a different field-alias table for library events
    pub fn with_aliases(mut self, aliases: FieldAliases) -> Self {
        self.aliases = aliases;
        self
    }

    /// Network this decoder serves
    pub fn network(&self) -> NetworkId {
        self.network
    }

    /// Shared identity resolver
    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.resolver
    }

    /// Decode one inbound frame. `None` means the frame carried nothing to act on.
    pub async fn process(&self, frame: InboundFrame) -> Option<DecodedEvent> {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        let local_id = self.local.get(self.network);

        let parsed = match frame {
            InboundFrame::Binary(bytes) => match self.network {
                NetworkId::Meshtastic => meshtastic::parse(&bytes),
                NetworkId::MeshCore => meshcore::parse(&bytes, local_id),
            },
            InboundFrame::Event(event) => {
                parse_event(self.network, &event, &self.aliases, local_id)
            }
        };

        match parsed {
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!(network = %self.network, error = %e, "Malformed frame");
                Some(DecodedEvent::Malformed {
                    reason: e.to_string(),
                })
            }
            Ok(Parsed::Ignored) => {
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                None
            }
            Ok(Parsed::Control(event)) => {
                self.counters.control.fetch_add(1, Ordering::Relaxed);
                trace!(network = %self.network, ?event, "Control event");
                Some(DecodedEvent::Control(event))
            }
            Ok(Parsed::Contact(contact)) => {
                self.counters.contacts.fetch_add(1, Ordering::Relaxed);
                Some(DecodedEvent::Contact(self.resolver.learn(contact).await))
            }
            Ok(Parsed::Packet {
                packet,
                direct,
                learned,
            }) => Some(DecodedEvent::Packet(
                self.finish_packet(packet, direct, learned).await,
            )),
        }
    }

    async fn finish_packet(
        &self,
        mut packet: Packet,
        direct: Option<NodeId>,
        learned: Option<Contact>,
    ) -> Packet {
        if let Some(contact) = learned {
            self.resolver.learn(contact).await;
        }

        let direct = direct.or((!packet.sender_unknown()).then_some(packet.from_id));
        let resolution = self
            .resolver
            .resolve(self.network, direct, packet.sender_key_prefix.as_deref())
            .await;
        packet.from_id = resolution.node_id;
        packet.resolution = resolution.outcome;

        if packet.kind.is_unknown() {
            self.counters.unknown_kinds.fetch_add(1, Ordering::Relaxed);
            info!(
                network = %self.network,
                kind = %packet.kind,
                from = %format_node_id(packet.from_id),
                size = packet.payload.len(),
                "Unknown payload type"
            );
        }
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        packet
    }

    /// Current counters
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames: self.counters.frames.load(Ordering::Relaxed),
            packets: self.counters.packets.load(Ordering::Relaxed),
            contacts: self.counters.contacts.load(Ordering::Relaxed),
            control: self.counters.control.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            unknown_kinds: self.counters.unknown_kinds.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for ProtocolDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolDecoder")
            .field("network", &self.network)
            .field("stats", &self.stats())
            .finish()
    }
}

const ADVERT_EVENT_TYPES: &[&str] = &["advert", "advertisement", "new_advert", "new_contact", "contact"];

/// Map a loosely-typed library event onto the packet model
pub(crate) fn parse_event(
    network: NetworkId,
    event: &LibraryEvent,
    aliases: &FieldAliases,
    local_id: Option<NodeId>,
) -> Result<Parsed> {
    if event.0.is_empty() {
        return Err(BridgeError::InvalidFrame("empty library event".into()));
    }

    let event_type = event
        .first_str(aliases.event_type)
        .map(|t| t.to_ascii_lowercase())
        .unwrap_or_default();
    let sender = aliases.sender_id(event);
    let key_prefix = aliases.key_prefix(event);
    let destination = aliases.destination(event);
    let channel = event
        .first_i64(aliases.channel)
        .and_then(|c| u8::try_from(c).ok());

    let rf = RfMetrics {
        rssi: event.first_i64(aliases.rssi).map(|v| v as i32),
        snr: event.first_f64(aliases.snr).map(|v| v as f32),
        hop_count: event
            .first_i64(aliases.hops)
            .and_then(|h| u8::try_from(h).ok())
            .map(|h| if h == u8::MAX { 0 } else { h }),
    };

    if let Some(text) = event.first_str(aliases.text) {
        let is_channel = event_type.contains("channel")
            || destination == Some(BROADCAST_NODE_ID)
            || (destination.is_none() && key_prefix.is_none() && channel.is_some());

        let mut packet = Packet::text(network, text).with_rf(rf);
        if !is_channel {
            packet = packet.with_to(destination.or(local_id).unwrap_or(UNKNOWN_NODE_ID));
            if destination.is_none() {
                packet = packet.to_local_node();
            }
        }
        if let Some(ch) = channel {
            packet = packet.with_channel(ch);
        }
        if let Some(prefix) = key_prefix {
            packet = packet.with_sender_key_prefix(prefix);
        }
        if let Some(id) = event
            .first_i64(aliases.packet_id)
            .and_then(|v| u32::try_from(v).ok())
        {
            packet = packet.with_packet_id(id);
        }
        return Ok(Parsed::Packet {
            packet,
            direct: sender,
            learned: None,
        });
    }

    if ADVERT_EVENT_TYPES.contains(&event_type.as_str()) {
        let node_id = sender
            .or_else(|| {
                key_prefix
                    .as_deref()
                    .filter(|_| network.derives_node_id_from_key())
                    .and_then(meshbridge_core::node::derive_node_id)
            })
            .ok_or_else(|| BridgeError::InvalidFrame("advert without identity".into()))?;
        let mut contact = Contact::new(network, node_id, ContactSource::Advert);
        if let Some(prefix) = &key_prefix {
            contact = contact.with_public_key(hex::decode(prefix).unwrap_or_default());
        }
        if let Some(name) = event.first_str(&["name", "adv_name", "long_name"]) {
            contact = contact.with_name(name);
        }
        return Ok(Parsed::Contact(contact));
    }

    let kind = match event_type.as_str() {
        "ack" => PayloadKind::Ack,
        "telemetry" => PayloadKind::Telemetry,
        "position" => PayloadKind::Position,
        "routing" | "path" | "trace" => PayloadKind::Routing,
        other => PayloadKind::Unknown(other.parse().unwrap_or(0)),
    };
    let body = serde_json::to_vec(&event.0)
        .map_err(|e| BridgeError::InvalidFrame(format!("unserializable event: {e}")))?;
    let mut packet = Packet::new(network, kind, Payload::Bytes(Bytes::from(body))).with_rf(rf);
    if let Some(to) = destination {
        packet = packet.with_to(to);
    }
    if let Some(prefix) = key_prefix {
        packet = packet.with_sender_key_prefix(prefix);
    }
    Ok(Parsed::Packet {
        packet,
        direct: sender,
        learned: None,
    })
}
