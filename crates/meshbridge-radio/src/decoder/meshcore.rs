//! MeshCore companion protocol
//!
//! Frames from the companion radio start with a response code (< 0x80) or a
//! push code (>= 0x80). Message receipts carry a 6-byte sender key prefix;
//! raw RF log pushes carry the whole on-air packet, whose header byte holds
//! the route type (bits 0-1) and payload type (bits 2-5).

use bytes::Bytes;
use chrono::Utc;

use meshbridge_core::node::node_id_from_public_key;
use meshbridge_core::{
    Contact, ContactSource, Location, NetworkId, NodeId, Packet, Payload, PayloadKind, RfMetrics,
    UNKNOWN_NODE_ID,
};

use super::{ControlEvent, Parsed};
use crate::error::{BridgeError, Result};

// Commands (client -> radio)
pub const CMD_APP_START: u8 = 1;
pub const CMD_SEND_TXT_MSG: u8 = 2;
pub const CMD_SEND_CHANNEL_TXT_MSG: u8 = 3;
pub const CMD_GET_CONTACTS: u8 = 4;
pub const CMD_SYNC_NEXT_MESSAGE: u8 = 10;
pub const CMD_REBOOT: u8 = 19;

// Responses (radio -> client)
pub const RESP_CODE_OK: u8 = 0;
pub const RESP_CODE_ERR: u8 = 1;
pub const RESP_CODE_CONTACTS_START: u8 = 2;
pub const RESP_CODE_CONTACT: u8 = 3;
pub const RESP_CODE_END_OF_CONTACTS: u8 = 4;
pub const RESP_CODE_SELF_INFO: u8 = 5;
pub const RESP_CODE_SENT: u8 = 6;
pub const RESP_CODE_CONTACT_MSG_RECV: u8 = 7;
pub const RESP_CODE_CHANNEL_MSG_RECV: u8 = 8;
pub const RESP_CODE_CURR_TIME: u8 = 9;
pub const RESP_CODE_NO_MORE_MESSAGES: u8 = 10;
pub const RESP_CODE_CONTACT_MSG_RECV_V3: u8 = 16;
pub const RESP_CODE_CHANNEL_MSG_RECV_V3: u8 = 17;

// Pushes (radio -> client, unsolicited)
pub const PUSH_CODE_ADVERT: u8 = 0x80;
pub const PUSH_CODE_PATH_UPDATED: u8 = 0x81;
pub const PUSH_CODE_SEND_CONFIRMED: u8 = 0x82;
pub const PUSH_CODE_MSG_WAITING: u8 = 0x83;
pub const PUSH_CODE_LOG_RX_DATA: u8 = 0x88;
pub const PUSH_CODE_NEW_ADVERT: u8 = 0x8A;

/// Text type: plain text
pub const TXT_TYPE_PLAIN: u8 = 0;
/// Text type: plain text prefixed by a 4-byte author key prefix
pub const TXT_TYPE_SIGNED_PLAIN: u8 = 2;

/// Key prefix length in message receipts and send commands
pub const PUBKEY_PREFIX_LEN: usize = 6;
const PUBKEY_LEN: usize = 32;
const MAX_PATH_LEN: usize = 64;
const ADV_NAME_LEN: usize = 32;
/// path_len value meaning "received directly, no flood path"
const PATH_LEN_DIRECT: u8 = 0xFF;
/// MeshCore coordinates are degrees * 1e6
const MESHCORE_COORD_SCALE: f64 = 1e6;

/// Bounds-checked cursor over a frame
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| {
            BridgeError::InvalidFrame(format!(
                "need {} bytes at offset {}, frame has {}",
                n,
                self.pos,
                self.buf.len()
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32_le(&mut self) -> Result<i32> {
        Ok(self.u32_le()? as i32)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf.get(self.pos..).unwrap_or_default();
        self.pos = self.buf.len();
        rest
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }
}

/// Parse one companion frame
pub(crate) fn parse(frame: &[u8], local_id: Option<NodeId>) -> Result<Parsed> {
    let mut r = Reader::new(frame);
    let code = r.u8()?;
    match code {
        RESP_CODE_OK => Ok(Parsed::Control(ControlEvent::CommandOk)),
        RESP_CODE_ERR => {
            let err = if r.remaining() > 0 { r.u8()? } else { 0 };
            Ok(Parsed::Control(ControlEvent::CommandError(err)))
        }
        RESP_CODE_CONTACTS_START => {
            let count = if r.remaining() >= 4 { r.u32_le()? } else { 0 };
            Ok(Parsed::Control(ControlEvent::ContactsStart { count }))
        }
        RESP_CODE_CONTACT => parse_contact(&mut r, ContactSource::Synced).map(Parsed::Contact),
        PUSH_CODE_NEW_ADVERT => parse_contact(&mut r, ContactSource::Advert).map(Parsed::Contact),
        RESP_CODE_END_OF_CONTACTS => Ok(Parsed::Control(ControlEvent::ContactsEnd)),
        RESP_CODE_SELF_INFO => parse_self_info(&mut r),
        RESP_CODE_SENT => {
            let _flood = r.u8()?;
            let expected_ack = r.u32_le()?;
            let timeout_ms = r.u32_le()?;
            Ok(Parsed::Control(ControlEvent::Sent {
                expected_ack,
                timeout_ms,
            }))
        }
        RESP_CODE_CONTACT_MSG_RECV => parse_contact_msg(&mut r, None, local_id),
        RESP_CODE_CONTACT_MSG_RECV_V3 => {
            let snr = r.i8()?;
            r.take(2)?;
            parse_contact_msg(&mut r, Some(snr), local_id)
        }
        RESP_CODE_CHANNEL_MSG_RECV => parse_channel_msg(&mut r, None),
        RESP_CODE_CHANNEL_MSG_RECV_V3 => {
            let snr = r.i8()?;
            r.take(2)?;
            parse_channel_msg(&mut r, Some(snr))
        }
        RESP_CODE_CURR_TIME => Ok(Parsed::Control(ControlEvent::CurrentTime(r.u32_le()?))),
        RESP_CODE_NO_MORE_MESSAGES => Ok(Parsed::Control(ControlEvent::NoMoreMessages)),
        PUSH_CODE_ADVERT => {
            let key = r.take(PUBKEY_LEN)?;
            let id = node_id_from_public_key(key).ok_or_else(|| {
                BridgeError::InvalidFrame("advert key maps to a reserved node id".into())
            })?;
            Ok(Parsed::Contact(
                Contact::new(NetworkId::MeshCore, id, ContactSource::Advert).with_public_key(key),
            ))
        }
        PUSH_CODE_PATH_UPDATED => {
            let key = r.take(PUBKEY_LEN)?;
            Ok(Parsed::Control(ControlEvent::PathUpdated {
                key_prefix: hex::encode(&key[..PUBKEY_PREFIX_LEN]),
            }))
        }
        PUSH_CODE_SEND_CONFIRMED => {
            let ack_code = r.u32_le()?;
            let round_trip_ms = r.u32_le()?;
            Ok(Parsed::Control(ControlEvent::SendConfirmed {
                ack_code,
                round_trip_ms,
            }))
        }
        PUSH_CODE_MSG_WAITING => Ok(Parsed::Control(ControlEvent::MessagesWaiting)),
        PUSH_CODE_LOG_RX_DATA => {
            let snr = r.i8()?;
            let rssi = r.i8()?;
            parse_raw_packet(r.rest(), snr, rssi)
        }
        other => Ok(Parsed::packet(Packet::new(
            NetworkId::MeshCore,
            PayloadKind::Unknown(other as u32),
            Payload::Bytes(Bytes::copy_from_slice(r.rest())),
        ))),
    }
}

fn hops_from_path_len(path_len: u8) -> u8 {
    if path_len == PATH_LEN_DIRECT {
        0
    } else {
        path_len
    }
}

fn decode_text(txt_type: u8, body: &[u8]) -> String {
    let body = if txt_type == TXT_TYPE_SIGNED_PLAIN && body.len() >= 4 {
        &body[4..]
    } else {
        body
    };
    let end = body.iter().position(|b| *b == 0).unwrap_or(body.len());
    String::from_utf8_lossy(&body[..end]).into_owned()
}

fn parse_contact_msg(r: &mut Reader<'_>, snr: Option<i8>, local_id: Option<NodeId>) -> Result<Parsed> {
    let prefix = r.take(PUBKEY_PREFIX_LEN)?;
    let path_len = r.u8()?;
    let txt_type = r.u8()?;
    let _sent_at = r.u32_le()?;
    let text = decode_text(txt_type, r.rest());

    let rf = RfMetrics {
        rssi: None,
        snr: snr.map(|s| s as f32 / 4.0),
        hop_count: Some(hops_from_path_len(path_len)),
    };
    let packet = Packet::text(NetworkId::MeshCore, text)
        .with_to(local_id.unwrap_or(UNKNOWN_NODE_ID))
        .to_local_node()
        .with_sender_key_prefix(hex::encode(prefix))
        .with_rf(rf);
    Ok(Parsed::packet(packet))
}

fn parse_channel_msg(r: &mut Reader<'_>, snr: Option<i8>) -> Result<Parsed> {
    let channel = r.u8()?;
    let path_len = r.u8()?;
    let txt_type = r.u8()?;
    let _sent_at = r.u32_le()?;
    let text = decode_text(txt_type, r.rest());

    let rf = RfMetrics {
        rssi: None,
        snr: snr.map(|s| s as f32 / 4.0),
        hop_count: Some(hops_from_path_len(path_len)),
    };
    let packet = Packet::text(NetworkId::MeshCore, text)
        .with_channel(channel)
        .with_rf(rf);
    Ok(Parsed::packet(packet))
}

fn location(lat: i32, lon: i32) -> Option<Location> {
    if lat == 0 && lon == 0 {
        return None;
    }
    let loc = Location::new(
        lat as f64 / MESHCORE_COORD_SCALE,
        lon as f64 / MESHCORE_COORD_SCALE,
    );
    loc.is_valid().then_some(loc)
}

fn fixed_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

/// Contact record: key, type, flags, out path, name, last advert, lat, lon, lastmod
fn parse_contact(r: &mut Reader<'_>, source: ContactSource) -> Result<Contact> {
    let key = r.take(PUBKEY_LEN)?;
    let _adv_type = r.u8()?;
    let _flags = r.u8()?;
    let _out_path_len = r.u8()?;
    let _out_path = r.take(MAX_PATH_LEN)?;
    let name = fixed_str(r.take(ADV_NAME_LEN)?);
    let last_advert = r.u32_le()?;
    let lat = r.i32_le()?;
    let lon = r.i32_le()?;

    let id = node_id_from_public_key(key)
        .ok_or_else(|| BridgeError::InvalidFrame("contact key maps to a reserved node id".into()))?;
    let mut contact = Contact::new(NetworkId::MeshCore, id, source)
        .with_public_key(key)
        .with_name(name);
    if let Some(loc) = location(lat, lon) {
        contact = contact.with_position(loc);
    }
    if let Some(seen) = chrono::DateTime::from_timestamp(last_advert as i64, 0) {
        if last_advert > 0 && seen <= Utc::now() {
            contact.last_seen = seen;
            contact.first_seen = contact.first_seen.min(seen);
        }
    }
    Ok(contact)
}

fn parse_self_info(r: &mut Reader<'_>) -> Result<Parsed> {
    let _adv_type = r.u8()?;
    let _tx_power = r.u8()?;
    let _max_tx_power = r.u8()?;
    let key = r.take(PUBKEY_LEN)?.to_vec();
    let _lat = r.i32_le()?;
    let _lon = r.i32_le()?;
    // multi_acks, advert_loc_policy, telemetry modes, manual_add, freq, bw, sf, cr
    let name = if r.remaining() > 14 {
        r.take(14)?;
        Some(fixed_str(r.rest())).filter(|n| !n.is_empty())
    } else {
        None
    };
    let node_id = node_id_from_public_key(&key)
        .ok_or_else(|| BridgeError::InvalidFrame("self key maps to a reserved node id".into()))?;
    Ok(Parsed::Control(ControlEvent::LocalNode {
        node_id,
        public_key: key,
        name,
    }))
}

/// On-air payload types (header bits 2-5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawPayloadType {
    Req,
    Response,
    TxtMsg,
    Ack,
    Advert,
    GroupText,
    GroupData,
    AnonReq,
    Path,
    Trace,
    Multipart,
    Control,
}

impl RawPayloadType {
    fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits {
            0x00 => Self::Req,
            0x01 => Self::Response,
            0x02 => Self::TxtMsg,
            0x03 => Self::Ack,
            0x04 => Self::Advert,
            0x05 => Self::GroupText,
            0x06 => Self::GroupData,
            0x07 => Self::AnonReq,
            0x08 => Self::Path,
            0x09 => Self::Trace,
            0x0A => Self::Multipart,
            0x0B => Self::Control,
            _ => return None,
        })
    }

    /// Payloads that start with a destination hash
    fn is_addressed(&self) -> bool {
        matches!(
            self,
            Self::Req | Self::Response | Self::TxtMsg | Self::AnonReq | Self::Path
        )
    }
}

const ROUTE_TRANSPORT_FLOOD: u8 = 0;
const ROUTE_FLOOD: u8 = 1;
const ROUTE_TRANSPORT_DIRECT: u8 = 3;

fn parse_raw_packet(raw: &[u8], snr: i8, rssi: i8) -> Result<Parsed> {
    let mut r = Reader::new(raw);
    let header = r.u8()?;
    let route = header & 0x03;
    let type_bits = (header >> 2) & 0x0F;
    if route == ROUTE_TRANSPORT_FLOOD || route == ROUTE_TRANSPORT_DIRECT {
        r.take(4)?;
    }
    let path_len = r.u8()? as usize;
    r.take(path_len)?;
    let body = r.rest();

    let rf = RfMetrics {
        rssi: Some(rssi as i32),
        snr: Some(snr as f32 / 4.0),
        hop_count: Some(path_len.min(u8::MAX as usize) as u8),
    };
    let flood = route == ROUTE_FLOOD || route == ROUTE_TRANSPORT_FLOOD;
    let payload = Payload::Bytes(Bytes::copy_from_slice(body));

    let Some(ptype) = RawPayloadType::from_bits(type_bits) else {
        let mut packet =
            Packet::new(NetworkId::MeshCore, PayloadKind::Unknown(type_bits as u32), payload)
                .with_rf(rf);
        if !flood {
            packet = packet.with_to(UNKNOWN_NODE_ID);
        }
        return Ok(Parsed::packet(packet));
    };

    let kind = match ptype {
        RawPayloadType::Ack | RawPayloadType::Multipart => PayloadKind::Ack,
        RawPayloadType::Advert => PayloadKind::Advert,
        RawPayloadType::Path | RawPayloadType::Trace | RawPayloadType::Control => {
            PayloadKind::Routing
        }
        _ => PayloadKind::Encrypted,
    };
    let mut packet = Packet::new(NetworkId::MeshCore, kind, payload).with_rf(rf);
    if ptype.is_addressed() || !flood {
        packet = packet.with_to(UNKNOWN_NODE_ID);
    }

    let mut learned = None;
    match ptype {
        RawPayloadType::Advert => {
            let advert = parse_advert(body)?;
            packet = packet.with_sender_key_prefix(hex::encode(&advert.public_key[..PUBKEY_PREFIX_LEN]));
            learned = Some(advert);
        }
        RawPayloadType::AnonReq => {
            let mut ar = Reader::new(body);
            let _dest_hash = ar.u8()?;
            let key = ar.take(PUBKEY_LEN)?;
            packet = packet.with_sender_key_prefix(hex::encode(&key[..PUBKEY_PREFIX_LEN]));
        }
        _ => {}
    }

    Ok(Parsed::Packet {
        packet,
        direct: None,
        learned,
    })
}

const ADV_FLAG_LOCATION: u8 = 0x10;
const ADV_FLAG_FEATURE1: u8 = 0x20;
const ADV_FLAG_FEATURE2: u8 = 0x40;
const ADV_FLAG_NAME: u8 = 0x80;

/// Advert payload: key, timestamp, signature, app data
fn parse_advert(body: &[u8]) -> Result<Contact> {
    let mut r = Reader::new(body);
    let key = r.take(PUBKEY_LEN)?;
    let _timestamp = r.u32_le()?;
    let _signature = r.take(64)?;

    let id = node_id_from_public_key(key)
        .ok_or_else(|| BridgeError::InvalidFrame("advert key maps to a reserved node id".into()))?;
    let mut contact = Contact::new(NetworkId::MeshCore, id, ContactSource::Advert).with_public_key(key);

    if r.remaining() == 0 {
        return Ok(contact);
    }
    let flags = r.u8()?;
    if flags & ADV_FLAG_LOCATION != 0 {
        let lat = r.i32_le()?;
        let lon = r.i32_le()?;
        if let Some(loc) = location(lat, lon) {
            contact = contact.with_position(loc);
        }
    }
    if flags & ADV_FLAG_FEATURE1 != 0 {
        r.u16_le()?;
    }
    if flags & ADV_FLAG_FEATURE2 != 0 {
        r.u16_le()?;
    }
    if flags & ADV_FLAG_NAME != 0 {
        contact = contact.with_name(fixed_str(r.rest()));
    }
    Ok(contact)
}

// ===== Command builders =====

fn unix_now() -> u32 {
    Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

/// `CMD_APP_START`: protocol version, reserved bytes, app name
pub fn app_start(app_name: &str) -> Vec<u8> {
    let mut frame = vec![CMD_APP_START, 3];
    frame.extend_from_slice(&[0u8; 6]);
    frame.extend_from_slice(app_name.as_bytes());
    frame
}

/// `CMD_GET_CONTACTS`
pub fn get_contacts() -> Vec<u8> {
    vec![CMD_GET_CONTACTS]
}

/// `CMD_SYNC_NEXT_MESSAGE`
pub fn sync_next_message() -> Vec<u8> {
    vec![CMD_SYNC_NEXT_MESSAGE]
}

/// `CMD_REBOOT`
pub fn reboot() -> Vec<u8> {
    let mut frame = vec![CMD_REBOOT];
    frame.extend_from_slice(b"reboot");
    frame
}

/// `CMD_SEND_TXT_MSG` to the contact owning `key_prefix` (hex, >= 12 chars)
pub fn send_text(key_prefix: &str, text: &str) -> Result<Vec<u8>> {
    let key = hex::decode(key_prefix.get(..PUBKEY_PREFIX_LEN * 2).ok_or_else(|| {
        BridgeError::InvalidFrame(format!("key prefix {key_prefix:?} shorter than 6 bytes"))
    })?)
    .map_err(|e| BridgeError::InvalidFrame(format!("key prefix {key_prefix:?}: {e}")))?;

    let mut frame = vec![CMD_SEND_TXT_MSG, TXT_TYPE_PLAIN, 0];
    frame.extend_from_slice(&unix_now().to_le_bytes());
    frame.extend_from_slice(&key);
    frame.extend_from_slice(text.as_bytes());
    Ok(frame)
}

/// `CMD_SEND_CHANNEL_TXT_MSG`
pub fn send_channel_text(channel: u8, text: &str) -> Vec<u8> {
    let mut frame = vec![CMD_SEND_CHANNEL_TXT_MSG, TXT_TYPE_PLAIN, channel];
    frame.extend_from_slice(&unix_now().to_le_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshbridge_core::MessageShape;

    fn contact_msg(prefix: &[u8; 6], text: &str) -> Vec<u8> {
        let mut f = vec![RESP_CODE_CONTACT_MSG_RECV];
        f.extend_from_slice(prefix);
        f.extend_from_slice(&[2, TXT_TYPE_PLAIN]);
        f.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        f.extend_from_slice(text.as_bytes());
        f
    }

    fn packet(parsed: Parsed) -> Packet {
        match parsed {
            Parsed::Packet { packet, .. } => packet,
            other => panic!("expected packet, got {other:?}"),
        }
    }

    #[test]
    fn test_contact_message() {
        let frame = contact_msg(&[0x14, 0x3b, 0xcd, 0x7f, 0x1b, 0x1f], "ping");
        let pkt = packet(parse(&frame, Some(0xaabbccdd)).unwrap());
        assert_eq!(pkt.text_body(), Some("ping"));
        assert_eq!(pkt.sender_key_prefix.as_deref(), Some("143bcd7f1b1f"));
        assert_eq!(pkt.to_id, 0xaabbccdd);
        assert!(pkt.sender_unknown());
        assert_eq!(pkt.shape(), MessageShape::DirectMessage);
        assert_eq!(pkt.rf.unwrap().hop_count, Some(2));
    }

    #[test]
    fn test_contact_message_before_self_info_is_ours() {
        let frame = contact_msg(&[0x14, 0x3b, 0xcd, 0x7f, 0x1b, 0x1f], "status");
        let pkt = packet(parse(&frame, None).unwrap());
        assert_eq!(pkt.to_id, UNKNOWN_NODE_ID);
        assert!(pkt.addressed_to_local);
        assert_eq!(pkt.shape(), MessageShape::DirectMessage);
    }

    #[test]
    fn test_contact_message_v3_snr() {
        let mut frame = vec![RESP_CODE_CONTACT_MSG_RECV_V3, 0x1c, 0, 0];
        frame.extend_from_slice(&[0x14, 0x3b, 0xcd, 0x7f, 0x1b, 0x1f, PATH_LEN_DIRECT, 0]);
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(b"hi");
        let pkt = packet(parse(&frame, None).unwrap());
        let rf = pkt.rf.unwrap();
        assert_eq!(rf.snr, Some(7.0));
        assert_eq!(rf.hop_count, Some(0));
    }

    #[test]
    fn test_signed_plain_strips_author() {
        let mut frame = vec![RESP_CODE_CONTACT_MSG_RECV];
        frame.extend_from_slice(&[1, 2, 3, 4, 5, 6, 0, TXT_TYPE_SIGNED_PLAIN]);
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        frame.extend_from_slice(b"room post");
        let pkt = packet(parse(&frame, None).unwrap());
        assert_eq!(pkt.text_body(), Some("room post"));
    }

    #[test]
    fn test_channel_message_is_broadcast() {
        let mut frame = vec![RESP_CODE_CHANNEL_MSG_RECV, 1, 3, 0];
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.extend_from_slice(b"Alice: hello");
        let pkt = packet(parse(&frame, None).unwrap());
        assert!(pkt.is_broadcast);
        assert!(!pkt.addressed_to_local);
        assert_eq!(pkt.channel, 1);
        assert_eq!(pkt.shape(), MessageShape::BroadcastMessage);
    }

    #[test]
    fn test_truncated_frame_is_error() {
        let frame = vec![RESP_CODE_CONTACT_MSG_RECV, 0x14, 0x3b];
        assert!(matches!(parse(&frame, None), Err(BridgeError::InvalidFrame(_))));
        assert!(parse(&[], None).is_err());
    }

    #[test]
    fn test_unknown_response_code() {
        let pkt = packet(parse(&[0x42, 1, 2, 3], None).unwrap());
        assert_eq!(pkt.kind, PayloadKind::Unknown(0x42));
        assert_eq!(pkt.payload.len(), 3);
    }

    #[test]
    fn test_unknown_raw_payload_type() {
        // header: flood route, payload type 0x0D
        let raw = [(0x0D << 2) | ROUTE_FLOOD, 0, 0xAA, 0xBB];
        let mut frame = vec![PUSH_CODE_LOG_RX_DATA, 0x28, (-90i8) as u8];
        frame.extend_from_slice(&raw);
        let pkt = packet(parse(&frame, None).unwrap());
        assert_eq!(pkt.kind, PayloadKind::Unknown(0x0D));
        assert_eq!(pkt.payload.len(), 2);
        assert_eq!(pkt.rf.unwrap().rssi, Some(-90));
        assert_eq!(pkt.rf.unwrap().snr, Some(10.0));
    }

    #[test]
    fn test_transport_codes_skipped() {
        // transport flood route with 4 transport code bytes, 1-hop path
        let raw = [(0x03 << 2) | ROUTE_TRANSPORT_FLOOD, 1, 2, 3, 4, 1, 0x7f, 0xEE];
        let mut frame = vec![PUSH_CODE_LOG_RX_DATA, 0, 0];
        frame.extend_from_slice(&raw);
        let pkt = packet(parse(&frame, None).unwrap());
        assert_eq!(pkt.kind, PayloadKind::Ack);
        assert_eq!(pkt.rf.unwrap().hop_count, Some(1));
        assert_eq!(pkt.payload.len(), 1);
    }

    #[test]
    fn test_raw_advert_learns_contact() {
        let mut key = vec![0x14, 0x3b, 0xcd, 0x7f, 0x1b, 0x1f];
        key.resize(32, 0x55);
        let mut body = key.clone();
        body.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        body.extend_from_slice(&[0u8; 64]);
        body.push(ADV_FLAG_LOCATION | ADV_FLAG_NAME | 0x01);
        body.extend_from_slice(&47_500_000i32.to_le_bytes());
        body.extend_from_slice(&(-122_300_000i32).to_le_bytes());
        body.extend_from_slice(b"Ridge");

        let mut frame = vec![PUSH_CODE_LOG_RX_DATA, 0, 0, (0x04 << 2) | ROUTE_FLOOD, 0];
        frame.extend_from_slice(&body);

        match parse(&frame, None).unwrap() {
            Parsed::Packet {
                packet, learned, ..
            } => {
                assert_eq!(packet.kind, PayloadKind::Advert);
                assert!(packet.is_broadcast);
                assert_eq!(packet.sender_key_prefix.as_deref(), Some("143bcd7f1b1f"));
                let contact = learned.unwrap();
                assert_eq!(contact.node_id, 0x143bcd7f);
                assert_eq!(contact.display_name.as_deref(), Some("Ridge"));
                let pos = contact.position.unwrap();
                assert!((pos.latitude - 47.5).abs() < 1e-9);
                assert!((pos.longitude + 122.3).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_addressed_raw_packet_is_foreign() {
        let raw = [(0x02 << 2) | ROUTE_FLOOD, 0, 0x11, 0x22, 0x33, 0x44];
        let mut frame = vec![PUSH_CODE_LOG_RX_DATA, 0, 0];
        frame.extend_from_slice(&raw);
        let pkt = packet(parse(&frame, None).unwrap());
        assert_eq!(pkt.kind, PayloadKind::Encrypted);
        assert!(!pkt.is_broadcast);
        assert_eq!(pkt.to_id, UNKNOWN_NODE_ID);
    }

    #[test]
    fn test_contact_record() {
        let mut frame = vec![RESP_CODE_CONTACT];
        let mut key = vec![0xa1, 0xb2, 0xc3, 0xd4];
        key.resize(32, 0);
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&[1, 0, 0xff]);
        frame.extend_from_slice(&[0u8; 64]);
        let mut name = b"Summit".to_vec();
        name.resize(32, 0);
        frame.extend_from_slice(&name);
        frame.extend_from_slice(&1_700_000_000u32.to_le_bytes());
        frame.extend_from_slice(&0i32.to_le_bytes());
        frame.extend_from_slice(&0i32.to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());

        match parse(&frame, None).unwrap() {
            Parsed::Contact(c) => {
                assert_eq!(c.node_id, 0xa1b2c3d4);
                assert_eq!(c.source, ContactSource::Synced);
                assert_eq!(c.display_name.as_deref(), Some("Summit"));
                assert!(c.position.is_none());
                assert_eq!(c.last_seen.timestamp(), 1_700_000_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_self_info() {
        let mut frame = vec![RESP_CODE_SELF_INFO, 1, 22, 22];
        let mut key = vec![0x0a, 0x0b, 0x0c, 0x0d];
        key.resize(32, 9);
        frame.extend_from_slice(&key);
        frame.extend_from_slice(&[0u8; 8]);
        frame.extend_from_slice(&[0u8; 14]);
        frame.extend_from_slice(b"bridge");
        match parse(&frame, None).unwrap() {
            Parsed::Control(ControlEvent::LocalNode { node_id, name, .. }) => {
                assert_eq!(node_id, 0x0a0b0c0d);
                assert_eq!(name.as_deref(), Some("bridge"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_command_builders() {
        let start = app_start("meshbridge");
        assert_eq!(&start[..2], &[CMD_APP_START, 3]);
        assert_eq!(&start[8..], b"meshbridge");

        let dm = send_text("143bcd7f1b1f99", "pong").unwrap();
        assert_eq!(&dm[..3], &[CMD_SEND_TXT_MSG, TXT_TYPE_PLAIN, 0]);
        assert_eq!(&dm[7..13], &[0x14, 0x3b, 0xcd, 0x7f, 0x1b, 0x1f]);
        assert_eq!(&dm[13..], b"pong");
        assert!(send_text("143b", "x").is_err());

        let ch = send_channel_text(2, "hi");
        assert_eq!(&ch[..3], &[CMD_SEND_CHANNEL_TXT_MSG, TXT_TYPE_PLAIN, 2]);
        assert_eq!(reboot(), b"\x13reboot".to_vec());
    }
}
