//! Meshtastic FromRadio/ToRadio handling

use bytes::Bytes;
use prost::Message;

use meshbridge_core::{
    Contact, ContactSource, Location, NetworkId, NodeId, Packet, Payload, PayloadKind, RfMetrics,
};

use super::proto::{self, from_radio, mesh_packet, to_radio, PortNum};
use super::{ControlEvent, Parsed};
use crate::error::{BridgeError, Result};

/// Hop limit for packets we originate
pub const DEFAULT_HOP_LIMIT: u32 = 3;

/// Decode one FromRadio frame
pub(crate) fn parse(frame: &[u8]) -> Result<Parsed> {
    let msg = proto::FromRadio::decode(frame)?;
    let Some(variant) = msg.payload_variant else {
        // config, channel, metadata and log records are not bridged
        return Ok(Parsed::Ignored);
    };

    match variant {
        from_radio::PayloadVariant::Packet(mp) => parse_mesh_packet(mp),
        from_radio::PayloadVariant::MyInfo(info) => Ok(Parsed::Control(ControlEvent::LocalNode {
            node_id: info.my_node_num,
            public_key: Vec::new(),
            name: None,
        })),
        from_radio::PayloadVariant::NodeInfo(info) => Ok(node_info_contact(info)
            .map(Parsed::Contact)
            .unwrap_or(Parsed::Ignored)),
        from_radio::PayloadVariant::ConfigCompleteId(id) => {
            Ok(Parsed::Control(ControlEvent::ConfigComplete(id)))
        }
        from_radio::PayloadVariant::Rebooted(_) => Ok(Parsed::Control(ControlEvent::Rebooted)),
    }
}

fn node_info_contact(info: proto::NodeInfo) -> Option<Contact> {
    if meshbridge_core::node::is_unknown(info.num) || meshbridge_core::node::is_broadcast(info.num)
    {
        return None;
    }
    let mut contact = Contact::new(NetworkId::Meshtastic, info.num, ContactSource::Synced);
    if let Some(user) = info.user {
        contact = apply_user(contact, user);
    }
    if let Some(loc) = info.position.as_ref().and_then(position_location) {
        contact = contact.with_position(loc);
    }
    Some(contact)
}

fn apply_user(contact: Contact, user: proto::User) -> Contact {
    let name = if user.long_name.trim().is_empty() {
        user.short_name
    } else {
        user.long_name
    };
    let contact = contact.with_name(name);
    if user.public_key.is_empty() {
        contact
    } else {
        contact.with_public_key(user.public_key)
    }
}

fn position_location(pos: &proto::Position) -> Option<Location> {
    let loc = Location::from_fixed(pos.latitude_i?, pos.longitude_i?)?;
    Some(match pos.altitude {
        Some(alt) => loc.with_altitude(alt as f64),
        None => loc,
    })
}

fn parse_mesh_packet(mp: proto::MeshPacket) -> Result<Parsed> {
    let rf = RfMetrics {
        rssi: (mp.rx_rssi != 0).then_some(mp.rx_rssi),
        snr: (mp.rx_snr != 0.0).then_some(mp.rx_snr),
        hop_count: (mp.hop_start > 0)
            .then(|| mp.hop_start.saturating_sub(mp.hop_limit).min(u8::MAX as u32) as u8),
    };

    let (kind, payload, learned) = match mp.payload_variant {
        Some(mesh_packet::PayloadVariant::Decoded(data)) => decode_data(mp.from, data),
        Some(mesh_packet::PayloadVariant::Encrypted(bytes)) => (
            PayloadKind::Encrypted,
            Payload::Bytes(Bytes::from(bytes)),
            None,
        ),
        None => {
            return Err(BridgeError::InvalidFrame(
                "mesh packet without payload".into(),
            ))
        }
    };

    let mut packet = Packet::new(NetworkId::Meshtastic, kind, payload)
        .with_from(mp.from)
        .with_to(mp.to)
        .with_channel(mp.channel.min(u8::MAX as u32) as u8)
        .with_rf(rf);
    if mp.id != 0 {
        packet = packet.with_packet_id(mp.id);
    }

    Ok(Parsed::Packet {
        packet,
        direct: Some(mp.from),
        learned,
    })
}

fn decode_data(from: NodeId, data: proto::Data) -> (PayloadKind, Payload, Option<Contact>) {
    let raw = Bytes::from(data.payload);
    let Ok(port) = PortNum::try_from(data.portnum) else {
        return (
            PayloadKind::Unknown(data.portnum as u32),
            Payload::Bytes(raw),
            None,
        );
    };

    match port {
        PortNum::TextMessageApp => (
            PayloadKind::TextMessage,
            Payload::Text(String::from_utf8_lossy(&raw).into_owned()),
            None,
        ),
        PortNum::PositionApp => {
            let learned = proto::Position::decode(raw.clone())
                .ok()
                .and_then(|pos| position_location(&pos))
                .map(|loc| {
                    Contact::new(NetworkId::Meshtastic, from, ContactSource::Advert)
                        .with_position(loc)
                });
            (PayloadKind::Position, Payload::Bytes(raw), learned)
        }
        PortNum::NodeinfoApp => {
            let learned = proto::User::decode(raw.clone()).ok().map(|user| {
                apply_user(
                    Contact::new(NetworkId::Meshtastic, from, ContactSource::Advert),
                    user,
                )
            });
            (PayloadKind::NodeInfo, Payload::Bytes(raw), learned)
        }
        PortNum::RoutingApp => (PayloadKind::Routing, Payload::Bytes(raw), None),
        PortNum::TelemetryApp => (PayloadKind::Telemetry, Payload::Bytes(raw), None),
        other => (
            PayloadKind::Unknown(other as i32 as u32),
            Payload::Bytes(raw),
            None,
        ),
    }
}

// ===== ToRadio builders =====

fn to_radio(variant: to_radio::PayloadVariant) -> Vec<u8> {
    proto::ToRadio {
        payload_variant: Some(variant),
    }
    .encode_to_vec()
}

/// Start the config exchange; the radio answers with its node db and
/// `config_complete_id = id`
pub fn want_config(id: u32) -> Vec<u8> {
    to_radio(to_radio::PayloadVariant::WantConfigId(id))
}

/// Keepalive so the radio does not drop an idle API client
pub fn heartbeat(nonce: u32) -> Vec<u8> {
    to_radio(to_radio::PayloadVariant::Heartbeat(proto::Heartbeat { nonce }))
}

fn data_packet(to: NodeId, channel: u8, port: PortNum, payload: Vec<u8>, want_ack: bool) -> Vec<u8> {
    let packet = proto::MeshPacket {
        to,
        channel: channel as u32,
        id: rand::random::<u32>() | 1,
        hop_limit: DEFAULT_HOP_LIMIT,
        want_ack,
        payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
            portnum: port as i32,
            payload,
            ..Default::default()
        })),
        ..Default::default()
    };
    to_radio(to_radio::PayloadVariant::Packet(packet))
}

/// Text message to a node (or `BROADCAST_NODE_ID`) on a channel
pub fn text_packet(to: NodeId, channel: u8, text: &str) -> Vec<u8> {
    let want_ack = !meshbridge_core::node::is_broadcast(to);
    data_packet(to, channel, PortNum::TextMessageApp, text.as_bytes().to_vec(), want_ack)
}

/// Admin request asking `local_node` to reboot after `seconds`
pub fn reboot(local_node: NodeId, seconds: i32) -> Vec<u8> {
    let admin = proto::AdminMessage {
        reboot_seconds: Some(seconds),
    };
    data_packet(local_node, 0, PortNum::AdminApp, admin.encode_to_vec(), false)
}
