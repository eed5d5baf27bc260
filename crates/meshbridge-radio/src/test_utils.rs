//! Test utilities for exercising the bridge without radios
//!
//! [`MockFactory`] hands out [`MockInterface`] handles keyed by transport, so
//! a test can grab the [`MockHandle`] for a configured transport, push frames
//! into it and inspect what the bridge wrote back. Handles for the same
//! transport share state, which is how a remote-reboot connection and the
//! main connection see the same "radio".
//!
//! # Example
//!
//! ```rust,ignore
//! use meshbridge_radio::test_utils::{meshcore_contact_message, MockFactory};
//!
//! let factory = Arc::new(MockFactory::new());
//! let radio = factory.handle(&TransportSpec::tcp("10.0.0.2", 5000));
//! let bridge = Bridge::start(config, dispatcher, store, factory.clone()).await?;
//!
//! radio.push_frame(meshcore_contact_message([0x14, 0x3b, 0xcd, 0x7f, 0x1b, 0x1f], "ping"));
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use prost::Message;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use meshbridge_core::{CommandDispatcher, DispatchContext, NetworkId, NodeId};

use crate::config::{NetworkConfig, TransportSpec};
use crate::decoder::meshcore::{
    PUSH_CODE_MSG_WAITING, RESP_CODE_CHANNEL_MSG_RECV, RESP_CODE_CONTACT_MSG_RECV,
    RESP_CODE_SELF_INFO, TXT_TYPE_PLAIN,
};
use crate::decoder::proto::{self, from_radio, mesh_packet, PortNum};
use crate::decoder::LibraryEvent;
use crate::error::{BridgeError, Result};
use crate::interface::{InboundFrame, InterfaceFactory, RadioInterface};
use crate::router::{Destination, OutboundTransport};

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    connect_calls: u32,
    connect_delay: Duration,
    refuse: bool,
    fail_next: u32,
    break_next_read: bool,
    inbound: VecDeque<InboundFrame>,
    written: Vec<Vec<u8>>,
}

/// Test-side control of a simulated radio
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
    notify: Arc<Notify>,
}

impl MockHandle {
    /// Create a radio with no queued frames
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a binary frame as if received from the radio
    pub fn push_frame(&self, payload: impl Into<Vec<u8>>) {
        self.push(InboundFrame::Binary(Bytes::from(payload.into())));
    }

    /// Queue a library event
    pub fn push_event(&self, event: LibraryEvent) {
        self.push(InboundFrame::Event(event));
    }

    fn push(&self, frame: InboundFrame) {
        self.state.lock().inbound.push_back(frame);
        self.notify.notify_one();
    }

    /// Delay every connect by `delay`
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = delay;
    }

    /// Refuse all connects until cleared
    pub fn refuse_connects(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Refuse the next `n` connects
    pub fn fail_next_connects(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Make the next read fail as if the peer hung up
    pub fn break_link(&self) {
        self.state.lock().break_next_read = true;
        self.notify.notify_one();
    }

    /// Number of connect calls so far
    pub fn connect_calls(&self) -> u32 {
        self.state.lock().connect_calls
    }

    /// Whether the simulated link is up
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Every payload written to the radio
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Forget written payloads
    pub fn clear_written(&self) {
        self.state.lock().written.clear();
    }
}

/// Simulated radio transport
#[derive(Debug)]
pub struct MockInterface {
    name: String,
    handle: MockHandle,
}

impl MockInterface {
    /// Create a handle backed by `handle`'s state
    pub fn new(name: impl Into<String>, handle: MockHandle) -> Self {
        Self {
            name: name.into(),
            handle,
        }
    }
}

#[async_trait]
impl RadioInterface for MockInterface {
    async fn connect(&mut self) -> Result<()> {
        let delay = self.handle.state.lock().connect_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.handle.state.lock();
        state.connect_calls += 1;
        if state.refuse {
            return Err(BridgeError::ConnectionRefused(self.name.clone()));
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BridgeError::ConnectionRefused(self.name.clone()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.handle.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    async fn read_frame(&mut self) -> Result<Option<InboundFrame>> {
        loop {
            {
                let mut state = self.handle.state.lock();
                if !state.connected {
                    return Err(BridgeError::NotConnected);
                }
                if state.break_next_read {
                    state.break_next_read = false;
                    state.connected = false;
                    return Err(BridgeError::Disconnected);
                }
                if let Some(frame) = state.inbound.pop_front() {
                    return Ok(Some(frame));
                }
            }
            self.handle.notify.notified().await;
        }
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let mut state = self.handle.state.lock();
        if !state.connected {
            return Err(BridgeError::NotConnected);
        }
        state.written.push(payload.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Hands out mock handles, one radio per transport
#[derive(Debug, Default)]
pub struct MockFactory {
    radios: Mutex<HashMap<String, MockHandle>>,
    created: Mutex<Vec<String>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The radio behind `transport`, created on first use
    pub fn handle(&self, transport: &TransportSpec) -> MockHandle {
        self.radios
            .lock()
            .entry(transport.to_string())
            .or_default()
            .clone()
    }

    /// Transports a handle was created for, in order
    pub fn created(&self) -> Vec<String> {
        self.created.lock().clone()
    }
}

impl InterfaceFactory for MockFactory {
    fn create(
        &self,
        _net: &NetworkConfig,
        transport: &TransportSpec,
        _connect_timeout: Duration,
    ) -> Result<Box<dyn RadioInterface>> {
        let key = transport.to_string();
        self.created.lock().push(key.clone());
        Ok(Box::new(MockInterface::new(
            format!("mock:{key}"),
            self.handle(transport),
        )))
    }
}

/// Dispatcher that records what it saw
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    direct: Mutex<Vec<String>>,
    broadcast: Mutex<Vec<String>>,
    unknown: AtomicUsize,
    echo: bool,
}

impl RecordingDispatcher {
    /// Never replies
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies "pong" to "ping", on both shapes
    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    fn reply(&self, text: &str) -> Option<String> {
        (self.echo && text.trim().eq_ignore_ascii_case("ping")).then(|| "pong".to_string())
    }

    pub fn direct_texts(&self) -> Vec<String> {
        self.direct.lock().clone()
    }

    pub fn broadcast_texts(&self) -> Vec<String> {
        self.broadcast.lock().clone()
    }

    pub fn unknown_count(&self) -> usize {
        self.unknown.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn on_direct_message(&self, ctx: &DispatchContext) -> Option<String> {
        self.direct.lock().push(ctx.text().to_string());
        self.reply(ctx.text())
    }

    async fn on_broadcast_message(&self, ctx: &DispatchContext) -> Option<String> {
        self.broadcast.lock().push(ctx.text().to_string());
        self.reply(ctx.text())
    }

    async fn on_unknown_payload(&self, _ctx: &DispatchContext) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outbound transport that records sends
#[derive(Debug)]
pub struct RecordingTransport {
    network: NetworkId,
    sent: Mutex<Vec<(Destination, String)>>,
    failing: AtomicBool,
}

impl RecordingTransport {
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            sent: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn sent(&self) -> Vec<(Destination, String)> {
        self.sent.lock().clone()
    }

    /// Make every later send fail as if the link were down
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutboundTransport for RecordingTransport {
    fn network(&self) -> NetworkId {
        self.network
    }

    async fn send_text(&self, destination: Destination, text: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BridgeError::NotConnected);
        }
        self.sent.lock().push((destination, text.to_string()));
        Ok(())
    }
}

/// MeshCore direct message receipt from the contact owning `key_prefix`
pub fn meshcore_contact_message(key_prefix: [u8; 6], text: &str) -> Vec<u8> {
    let mut frame = vec![RESP_CODE_CONTACT_MSG_RECV];
    frame.extend_from_slice(&key_prefix);
    frame.extend_from_slice(&[0, TXT_TYPE_PLAIN]);
    frame.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame
}

/// MeshCore channel message receipt
pub fn meshcore_channel_message(channel: u8, text: &str) -> Vec<u8> {
    let mut frame = vec![RESP_CODE_CHANNEL_MSG_RECV, channel, 1, TXT_TYPE_PLAIN];
    frame.extend_from_slice(&1_700_000_000u32.to_le_bytes());
    frame.extend_from_slice(text.as_bytes());
    frame
}

/// MeshCore self-info response for a radio whose key starts with `key_head`
pub fn meshcore_self_info(key_head: [u8; 4], name: &str) -> Vec<u8> {
    let mut frame = vec![RESP_CODE_SELF_INFO, 1, 22, 22];
    let mut key = key_head.to_vec();
    key.resize(32, 0x11);
    frame.extend_from_slice(&key);
    frame.extend_from_slice(&[0u8; 22]);
    frame.extend_from_slice(name.as_bytes());
    frame
}

/// MeshCore "messages waiting" push
pub fn meshcore_messages_waiting() -> Vec<u8> {
    vec![PUSH_CODE_MSG_WAITING]
}

/// Meshtastic FromRadio carrying a text packet
pub fn meshtastic_text(from: NodeId, to: NodeId, channel: u8, text: &str) -> Vec<u8> {
    proto::FromRadio {
        id: rand::random(),
        payload_variant: Some(from_radio::PayloadVariant::Packet(proto::MeshPacket {
            from,
            to,
            channel: channel as u32,
            id: rand::random::<u32>() | 1,
            hop_start: 3,
            hop_limit: 3,
            payload_variant: Some(mesh_packet::PayloadVariant::Decoded(proto::Data {
                portnum: PortNum::TextMessageApp as i32,
                payload: text.as_bytes().to_vec(),
                ..Default::default()
            })),
            ..Default::default()
        })),
    }
    .encode_to_vec()
}

/// Meshtastic FromRadio announcing the radio's own node number
pub fn meshtastic_my_info(node: NodeId) -> Vec<u8> {
    proto::FromRadio {
        id: rand::random(),
        payload_variant: Some(from_radio::PayloadVariant::MyInfo(proto::MyNodeInfo {
            my_node_num: node,
        })),
    }
    .encode_to_vec()
}

/// Decode a Meshtastic ToRadio text packet written by the bridge
pub fn decode_meshtastic_text(frame: &[u8]) -> Option<(NodeId, String)> {
    decode_meshtastic_text_on(frame).map(|(to, _, text)| (to, text))
}

/// Like [`decode_meshtastic_text`], keeping the channel index
pub fn decode_meshtastic_text_on(frame: &[u8]) -> Option<(NodeId, u8, String)> {
    let msg = proto::ToRadio::decode(frame).ok()?;
    let Some(proto::to_radio::PayloadVariant::Packet(packet)) = msg.payload_variant else {
        return None;
    };
    let Some(mesh_packet::PayloadVariant::Decoded(data)) = packet.payload_variant else {
        return None;
    };
    (data.portnum == PortNum::TextMessageApp as i32)
        .then(|| {
            (
                packet.to,
                packet.channel as u8,
                String::from_utf8_lossy(&data.payload).into_owned(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_interface_connect_read_write() {
        let handle = MockHandle::new();
        let mut mock = MockInterface::new("mock", handle.clone());
        assert!(mock.read_frame().await.is_err());

        mock.connect().await.unwrap();
        handle.push_frame(vec![1, 2, 3]);
        match mock.read_frame().await.unwrap() {
            Some(InboundFrame::Binary(b)) => assert_eq!(&b[..], &[1, 2, 3]),
            other => panic!("unexpected {other:?}"),
        }
        mock.write_frame(&[9]).await.unwrap();
        assert_eq!(handle.written(), vec![vec![9]]);
    }

    #[tokio::test]
    async fn test_mock_connect_failures() {
        let handle = MockHandle::new();
        let mut mock = MockInterface::new("mock", handle.clone());
        handle.fail_next_connects(1);
        assert!(mock.connect().await.is_err());
        assert!(mock.connect().await.is_ok());
        assert_eq!(handle.connect_calls(), 2);

        handle.break_link();
        assert!(matches!(
            mock.read_frame().await,
            Err(BridgeError::Disconnected)
        ));
        assert!(!handle.is_connected());
    }

    #[test]
    fn test_factory_shares_radio_per_transport() {
        let factory = MockFactory::new();
        let spec = TransportSpec::tcp("10.0.0.1", 4403);
        let net = NetworkConfig::new(NetworkId::Meshtastic, spec.clone());
        let _a = factory.create(&net, &spec, Duration::from_secs(1)).unwrap();
        let _b = factory.create(&net, &spec, Duration::from_secs(1)).unwrap();
        assert_eq!(factory.created().len(), 2);
        factory.handle(&spec).push_frame(vec![0]);
        assert_eq!(factory.handle(&spec).state.lock().inbound.len(), 1);
    }

    #[test]
    fn test_meshtastic_text_round_trips_through_helpers() {
        let outbound = crate::decoder::meshtastic::text_packet(0x1234, 0, "pong");
        assert_eq!(
            decode_meshtastic_text(&outbound),
            Some((0x1234, "pong".to_string()))
        );
        assert!(!meshtastic_text(1, 2, 0, "hi").is_empty());
    }
}
