//! Stream framing for both radio protocols
//!
//! Meshtastic stream API:
//! - Bytes 0-1: Magic (0x94C3)
//! - Bytes 2-3: Length (big-endian u16)
//! - Bytes 4+: Protobuf payload
//!
//! MeshCore companion protocol:
//! - Byte 0: `>` from the radio, `<` to the radio
//! - Bytes 1-2: Length (little-endian u16)
//! - Bytes 3+: Frame (first byte is the response/command code)
//!
//! Bytes between frames (firmware debug console output) are discarded.

use bytes::{Buf, Bytes, BytesMut};
use tracing::{debug, trace};

use meshbridge_core::NetworkId;

use crate::config::MESHTASTIC_MAGIC;
use crate::error::{BridgeError, Result};

/// Largest Meshtastic frame the firmware emits
pub const MESHTASTIC_MAX_FRAME: usize = 512;

/// Largest MeshCore companion frame
pub const MESHCORE_MAX_FRAME: usize = 300;

const MESHCORE_FROM_RADIO: u8 = b'>';
const MESHCORE_TO_RADIO: u8 = b'<';

/// Wire framing used by a network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// `0x94 0xC3 len_be16`
    Meshtastic,
    /// `'>' len_le16` inbound, `'<' len_le16` outbound
    MeshCore,
}

impl FrameFormat {
    /// Header length in bytes
    pub fn header_len(&self) -> usize {
        match self {
            FrameFormat::Meshtastic => 4,
            FrameFormat::MeshCore => 3,
        }
    }

    /// Maximum accepted payload length
    pub fn max_frame(&self) -> usize {
        match self {
            FrameFormat::Meshtastic => MESHTASTIC_MAX_FRAME,
            FrameFormat::MeshCore => MESHCORE_MAX_FRAME,
        }
    }

    /// Frame a payload for writing to the radio
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > self.max_frame() {
            return Err(BridgeError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame(),
            });
        }
        let length = payload.len() as u16;
        let mut frame = Vec::with_capacity(self.header_len() + payload.len());
        match self {
            FrameFormat::Meshtastic => {
                frame.extend_from_slice(&MESHTASTIC_MAGIC.to_be_bytes());
                frame.extend_from_slice(&length.to_be_bytes());
            }
            FrameFormat::MeshCore => {
                frame.push(MESHCORE_TO_RADIO);
                frame.extend_from_slice(&length.to_le_bytes());
            }
        }
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Whether `buf[pos..]` starts a frame header
    fn header_at(&self, buf: &[u8], pos: usize) -> bool {
        match self {
            FrameFormat::Meshtastic => {
                buf.get(pos) == Some(&0x94) && buf.get(pos + 1).map_or(true, |b| *b == 0xC3)
            }
            FrameFormat::MeshCore => buf.get(pos) == Some(&MESHCORE_FROM_RADIO),
        }
    }

    fn declared_len(&self, buf: &[u8]) -> usize {
        match self {
            FrameFormat::Meshtastic => u16::from_be_bytes([buf[2], buf[3]]) as usize,
            FrameFormat::MeshCore => u16::from_le_bytes([buf[1], buf[2]]) as usize,
        }
    }
}

impl From<NetworkId> for FrameFormat {
    fn from(network: NetworkId) -> Self {
        match network {
            NetworkId::Meshtastic => FrameFormat::Meshtastic,
            NetworkId::MeshCore => FrameFormat::MeshCore,
        }
    }
}

/// Accumulates stream bytes and yields complete frame payloads
#[derive(Debug)]
pub struct FrameDecoder {
    format: FrameFormat,
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a decoder for a framing style
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            buffer: BytesMut::with_capacity(format.max_frame() * 2),
        }
    }

    /// Framing style
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Append bytes read from the transport
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Drop buffered bytes (after a reconnect)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Bytes waiting for a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Try to extract the next complete frame payload.
    ///
    /// An implausible length skips the header and returns an error; the
    /// remaining buffer is rescanned on the next call.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        self.resync();

        let header = self.format.header_len();
        if self.buffer.len() < header {
            return Ok(None);
        }

        let length = self.format.declared_len(&self.buffer);
        if length > self.format.max_frame() {
            self.buffer.advance(1);
            return Err(BridgeError::FrameTooLarge {
                size: length,
                max: self.format.max_frame(),
            });
        }

        let total_size = header + length;
        if self.buffer.len() < total_size {
            trace!(
                have = self.buffer.len(),
                need = total_size,
                "Waiting for complete frame"
            );
            return Ok(None);
        }

        let mut frame = self.buffer.split_to(total_size);
        frame.advance(header);
        Ok(Some(frame.freeze()))
    }

    /// Discard bytes before the next frame header
    fn resync(&mut self) {
        if self.buffer.is_empty() || self.format.header_at(&self.buffer, 0) {
            return;
        }
        let skip = (1..self.buffer.len())
            .find(|&i| self.format.header_at(&self.buffer, i))
            .unwrap_or(self.buffer.len());
        debug!(discarded = skip, "Discarding bytes outside frames");
        self.buffer.advance(skip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meshcore_inbound(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![b'>'];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_meshtastic_frame() {
        let framed = FrameFormat::Meshtastic.encode(b"hello").unwrap();
        assert_eq!(&framed[..4], &[0x94, 0xC3, 0x00, 0x05]);
        assert_eq!(&framed[4..], b"hello");
    }

    #[test]
    fn test_meshcore_outbound_uses_lt_marker() {
        let framed = FrameFormat::MeshCore.encode(&[0x01, 0x03]).unwrap();
        assert_eq!(framed, vec![b'<', 0x02, 0x00, 0x01, 0x03]);
    }

    #[test]
    fn test_parse_partial_then_complete() {
        let mut dec = FrameDecoder::new(FrameFormat::Meshtastic);
        dec.extend(&[0x94, 0xC3, 0x00, 0x04, b't']);
        assert!(dec.next_frame().unwrap().is_none());
        assert_eq!(dec.buffered(), 5);

        dec.extend(b"est");
        assert_eq!(dec.next_frame().unwrap().unwrap().as_ref(), b"test");
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_skip_console_text_before_magic() {
        let mut dec = FrameDecoder::new(FrameFormat::Meshtastic);
        dec.extend(b"DEBUG | ??:??:?? 3 [Router] boot\r\n");
        dec.extend(&FrameFormat::Meshtastic.encode(b"pb").unwrap());
        assert_eq!(dec.next_frame().unwrap().unwrap().as_ref(), b"pb");
    }

    #[test]
    fn test_trailing_magic_byte_kept() {
        let mut dec = FrameDecoder::new(FrameFormat::Meshtastic);
        dec.extend(&[0x01, 0x02, 0x94]);
        assert!(dec.next_frame().unwrap().is_none());
        assert_eq!(dec.buffered(), 1);
    }

    #[test]
    fn test_meshcore_back_to_back_frames() {
        let mut dec = FrameDecoder::new(FrameFormat::MeshCore);
        let mut bytes = meshcore_inbound(&[0x0a]);
        bytes.extend(meshcore_inbound(&[0x83]));
        dec.extend(&bytes);
        assert_eq!(dec.next_frame().unwrap().unwrap().as_ref(), &[0x0a]);
        assert_eq!(dec.next_frame().unwrap().unwrap().as_ref(), &[0x83]);
        assert!(dec.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_is_skipped() {
        let mut dec = FrameDecoder::new(FrameFormat::MeshCore);
        dec.extend(&[b'>', 0xff, 0xff]);
        dec.extend(&meshcore_inbound(&[0x05]));
        assert!(matches!(
            dec.next_frame(),
            Err(BridgeError::FrameTooLarge { .. })
        ));
        assert_eq!(dec.next_frame().unwrap().unwrap().as_ref(), &[0x05]);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let big = vec![0u8; MESHCORE_MAX_FRAME + 1];
        assert!(FrameFormat::MeshCore.encode(&big).is_err());
    }
}
