//! Integration tests for the two-network bridge
//!
//! These drive a full [`Bridge`] against mock radios:
//! - Unknown frame types still reach the router
//! - Sender ids derived from key prefixes
//! - Replies leave on the network the request arrived on
//! - Broadcast echo suppression
//! - Reconnect serialization and silence recovery
//! - Startup conflict detection

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use meshbridge_core::{NetworkId, OutboundMessage, SendFailure, SendOutcome};
use meshbridge_radio::decoder::meshcore::{CMD_SEND_CHANNEL_TXT_MSG, CMD_SEND_TXT_MSG};
use meshbridge_radio::test_utils::{
    decode_meshtastic_text, decode_meshtastic_text_on, meshcore_channel_message, meshcore_contact_message,
    meshcore_self_info, meshtastic_my_info, meshtastic_text, MockFactory, MockHandle,
    RecordingDispatcher,
};
use meshbridge_radio::{
    Bridge, BridgeConfig, BridgeConfigBuilder, BridgeError, HealthConfig, HealthState,
    LibraryEvent, NetworkConfig, ReconnectOutcome, TransportSpec,
};
use meshbridge_state::MemoryContactStore;

// ============================================================================
// Fixture
// ============================================================================

const LOCAL_A: u32 = 0xaaaa0001;
const SENDER_KEY: [u8; 6] = [0x14, 0x3b, 0xcd, 0x7f, 0x1b, 0x1f];
const SENDER_ID: u32 = 0x143bcd7f;

fn meshtastic_spec() -> TransportSpec {
    TransportSpec::tcp("10.0.0.1", 4403)
}

fn meshcore_spec() -> TransportSpec {
    TransportSpec::tcp("10.0.0.2", 5000)
}

struct Fixture {
    bridge: Bridge,
    dispatcher: Arc<RecordingDispatcher>,
    mesh_a: MockHandle,
    mesh_b: MockHandle,
}

fn two_network_config() -> BridgeConfig {
    BridgeConfigBuilder::new()
        .network(NetworkConfig::new(NetworkId::Meshtastic, meshtastic_spec()).with_local_node_id(LOCAL_A))
        .meshcore(meshcore_spec())
        .build()
}

async fn start(config: BridgeConfig) -> Fixture {
    let factory = Arc::new(MockFactory::new());
    let mesh_a = factory.handle(&meshtastic_spec());
    let mesh_b = factory.handle(&meshcore_spec());
    let dispatcher = Arc::new(RecordingDispatcher::echo());
    let bridge = Bridge::start(
        config,
        dispatcher.clone(),
        Arc::new(MemoryContactStore::new()),
        factory,
    )
    .await
    .expect("bridge starts");
    Fixture {
        bridge,
        dispatcher,
        mesh_a,
        mesh_b,
    }
}

/// Let readers and the router drain what was pushed
async fn settle() {
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn meshcore_texts(radio: &MockHandle, code: u8) -> Vec<Vec<u8>> {
    radio
        .written()
        .into_iter()
        .filter(|f| f.first() == Some(&code))
        .collect()
}

async fn meshcore_local(f: &Fixture) {
    f.mesh_b.push_frame(meshcore_self_info([0xbb, 0xbb, 0x00, 0x01], "bridge"));
    settle().await;
}

// ============================================================================
// Decoding
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_unknown_frame_type_reaches_router() {
    let f = start(two_network_config()).await;
    f.mesh_b.push_frame(vec![0x42, 0xde, 0xad]);
    settle().await;

    let stats = f.bridge.handle().stats().await.unwrap();
    assert_eq!(stats.router.unknown_payloads, 1);
    assert_eq!(stats.router.received, 1);
    let b = stats.network(NetworkId::MeshCore).unwrap();
    assert_eq!(b.decoder.unknown_kinds, 1);
    assert_eq!(b.decoder.malformed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_frame_is_counted_not_fatal() {
    let f = start(two_network_config()).await;
    f.mesh_b.push_frame(vec![0x07, 0x14]);
    f.mesh_b.push_frame(meshcore_channel_message(0, "still here"));
    settle().await;

    let stats = f.bridge.handle().stats().await.unwrap();
    assert_eq!(stats.network(NetworkId::MeshCore).unwrap().decoder.malformed, 1);
    assert_eq!(f.dispatcher.broadcast_texts(), vec!["still here".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_key_prefix_derives_sender_id() {
    let f = start(two_network_config()).await;
    meshcore_local(&f).await;

    f.mesh_b.push_frame(meshcore_contact_message(SENDER_KEY, "status"));
    settle().await;
    assert_eq!(f.dispatcher.direct_texts(), vec!["status".to_string()]);

    let outcome = f
        .bridge
        .handle()
        .send_reply(OutboundMessage::reply_to(SENDER_ID, "ok"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SendOutcome::Sent {
            network: NetworkId::MeshCore,
            to_id: SENDER_ID
        }
    );
    let sent = meshcore_texts(&f.mesh_b, CMD_SEND_TXT_MSG);
    assert_eq!(sent.len(), 1);
    assert_eq!(&sent[0][7..13], &SENDER_KEY);
    assert_eq!(&sent[0][13..], b"ok");
}

#[tokio::test(start_paused = true)]
async fn test_library_event_dispatched() {
    let f = start(two_network_config()).await;
    let event = LibraryEvent::from_value(json!({
        "type": "text",
        "fromId": "!00001234",
        "toId": LOCAL_A,
        "text": "hello bridge",
    }))
    .unwrap();
    f.mesh_a.push_event(event);
    settle().await;
    assert_eq!(f.dispatcher.direct_texts(), vec!["hello bridge".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_direct_message_before_self_info_dispatched() {
    let f = start(two_network_config()).await;

    f.mesh_b.push_frame(meshcore_contact_message(SENDER_KEY, "status"));
    settle().await;
    assert_eq!(f.dispatcher.direct_texts(), vec!["status".to_string()]);
    let stats = f.bridge.handle().stats().await.unwrap();
    assert_eq!(stats.router.foreign, 0);

    f.mesh_b.push_frame(meshcore_contact_message(SENDER_KEY, "ping"));
    settle().await;
    let replies = meshcore_texts(&f.mesh_b, CMD_SEND_TXT_MSG);
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][7..13], &SENDER_KEY);
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_reply_leaves_on_request_network() {
    let f = start(two_network_config()).await;
    meshcore_local(&f).await;
    f.mesh_a.clear_written();
    f.mesh_b.clear_written();

    f.mesh_b.push_frame(meshcore_contact_message(SENDER_KEY, "ping"));
    settle().await;

    let replies = meshcore_texts(&f.mesh_b, CMD_SEND_TXT_MSG);
    assert_eq!(replies.len(), 1);
    assert_eq!(&replies[0][13..], b"pong");
    assert!(f
        .mesh_a
        .written()
        .iter()
        .all(|frame| decode_meshtastic_text(frame).is_none()));

    // Meshtastic request replies on Meshtastic
    f.mesh_a.push_frame(meshtastic_text(0x1234, LOCAL_A, 0, "ping"));
    settle().await;
    let a_texts: Vec<_> = f
        .mesh_a
        .written()
        .iter()
        .filter_map(|frame| decode_meshtastic_text(frame))
        .collect();
    assert_eq!(a_texts, vec![(0x1234, "pong".to_string())]);
    assert_eq!(meshcore_texts(&f.mesh_b, CMD_SEND_TXT_MSG).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_direct_reply_on_request_channel() {
    let f = start(two_network_config()).await;
    f.mesh_a.clear_written();

    f.mesh_a.push_frame(meshtastic_text(0x1234, LOCAL_A, 2, "ping"));
    settle().await;
    let a_texts: Vec<_> = f
        .mesh_a
        .written()
        .iter()
        .filter_map(|frame| decode_meshtastic_text_on(frame))
        .collect();
    assert_eq!(a_texts, vec![(0x1234, 2, "pong".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn test_local_identity_learned_from_radio() {
    let config = BridgeConfigBuilder::new().meshtastic(meshtastic_spec()).build();
    let f = start(config).await;

    // Not addressed to a known local node yet
    f.mesh_a.push_frame(meshtastic_text(0x1234, 0x0bad_cafe, 0, "early"));
    settle().await;
    assert!(f.dispatcher.direct_texts().is_empty());

    f.mesh_a.push_frame(meshtastic_my_info(0x0bad_cafe));
    f.mesh_a.push_frame(meshtastic_text(0x1234, 0x0bad_cafe, 0, "late"));
    settle().await;
    assert_eq!(f.dispatcher.direct_texts(), vec!["late".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_reply_to_unknown_sender_fails() {
    let f = start(two_network_config()).await;
    let outcome = f
        .bridge
        .handle()
        .send_reply(OutboundMessage::reply_to(0x5555, "hi"))
        .await
        .unwrap();
    assert_eq!(outcome, SendOutcome::Failed(SendFailure::NoRoute(0x5555)));
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_echo_suppressed_once_per_emission() {
    let f = start(two_network_config()).await;
    let handle = f.bridge.handle();

    let outcome = handle
        .send_reply(OutboundMessage::broadcast(NetworkId::MeshCore, 0, "hello"))
        .await
        .unwrap();
    assert!(outcome.is_sent());
    assert_eq!(meshcore_texts(&f.mesh_b, CMD_SEND_CHANNEL_TXT_MSG).len(), 1);

    f.mesh_b.push_frame(meshcore_channel_message(0, "hello"));
    settle().await;
    assert!(f.dispatcher.broadcast_texts().is_empty());

    f.mesh_b.push_frame(meshcore_channel_message(0, "hello"));
    settle().await;
    assert_eq!(f.dispatcher.broadcast_texts(), vec!["hello".to_string()]);

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.router.suppressed, 1);
    assert_eq!(stats.dedup.suppressed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_echo_after_window_processed() {
    let f = start(two_network_config()).await;
    let handle = f.bridge.handle();

    handle
        .send_reply(OutboundMessage::broadcast(NetworkId::MeshCore, 0, "hello"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;

    f.mesh_b.push_frame(meshcore_channel_message(0, "hello"));
    settle().await;
    assert_eq!(f.dispatcher.broadcast_texts(), vec!["hello".to_string()]);
    assert_eq!(handle.stats().await.unwrap().router.suppressed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_unrelated_broadcast_passes_dedup() {
    let f = start(two_network_config()).await;
    let handle = f.bridge.handle();
    handle
        .send_reply(OutboundMessage::broadcast(NetworkId::MeshCore, 0, "net check"))
        .await
        .unwrap();

    f.mesh_b.push_frame(meshcore_channel_message(0, "anyone on?"));
    settle().await;
    assert_eq!(f.dispatcher.broadcast_texts(), vec!["anyone on?".to_string()]);
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_reconnects_run_once() {
    let f = start(two_network_config()).await;
    let manager = f.bridge.manager(NetworkId::MeshCore).unwrap().clone();
    f.mesh_b.set_connect_delay(Duration::from_millis(500));
    let before = f.mesh_b.connect_calls();

    let (first, second) = tokio::join!(
        manager.force_reconnect("first"),
        manager.force_reconnect("second")
    );
    assert_eq!(first, ReconnectOutcome::Reconnected { attempts: 1 });
    assert_eq!(second, ReconnectOutcome::AlreadyInProgress);
    assert_eq!(f.mesh_b.connect_calls(), before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_on_one_network_does_not_stall_the_other() {
    let f = start(two_network_config()).await;
    let handle = f.bridge.handle();
    f.mesh_a.push_frame(meshtastic_text(0x1234, LOCAL_A, 0, "status"));
    settle().await;

    f.mesh_a.set_connect_delay(Duration::from_secs(10));
    let manager = f.bridge.manager(NetworkId::Meshtastic).unwrap().clone();
    let reconnect = tokio::spawn(async move { manager.force_reconnect("slow radio").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A reply on the reconnecting network fails fast instead of queueing
    let outcome = tokio::time::timeout(
        Duration::from_secs(1),
        handle.send_reply(OutboundMessage::reply_to(0x1234, "x")),
    )
    .await
    .expect("reply does not wait for the reconnect")
    .unwrap();
    assert!(matches!(outcome, SendOutcome::Failed(SendFailure::Transport(_))));

    f.mesh_b.push_frame(meshcore_channel_message(0, "on B"));
    settle().await;
    assert_eq!(f.dispatcher.broadcast_texts(), vec!["on B".to_string()]);
    assert!(!reconnect.is_finished());

    assert_eq!(
        reconnect.await.unwrap(),
        ReconnectOutcome::Reconnected { attempts: 1 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_silence_triggers_reconnect() {
    let health = HealthConfig {
        silence_timeout: Duration::from_secs(120),
        poll_interval: Duration::from_secs(5),
        scheduled_reconnect: None,
        ..HealthConfig::default()
    };
    let config = BridgeConfigBuilder::new()
        .meshtastic(meshtastic_spec())
        .health(health)
        .build();
    let f = start(config).await;
    let manager = f.bridge.manager(NetworkId::Meshtastic).unwrap().clone();
    assert_eq!(f.mesh_a.connect_calls(), 1);

    // 120s of silence is not yet over the limit
    tokio::time::sleep(Duration::from_secs(122)).await;
    assert_eq!(f.mesh_a.connect_calls(), 1);
    assert_eq!(manager.snapshot().state, HealthState::Connected);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(f.mesh_a.connect_calls(), 2);
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.state, HealthState::Connected);
    assert!(snapshot.silence_ms < 2_000);
}

#[tokio::test(start_paused = true)]
async fn test_link_error_reconnects() {
    let f = start(two_network_config()).await;
    f.mesh_b.break_link();
    settle().await;
    assert_eq!(f.mesh_b.connect_calls(), 2);
    assert!(f.mesh_b.is_connected());

    // Still delivering after the reconnect
    f.mesh_b.push_frame(meshcore_channel_message(2, "back"));
    settle().await;
    assert_eq!(f.dispatcher.broadcast_texts(), vec!["back".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_radio_starts_failed_then_recovers() {
    let factory = Arc::new(MockFactory::new());
    let radio = factory.handle(&meshtastic_spec());
    radio.refuse_connects(true);
    let config = BridgeConfigBuilder::new()
        .meshtastic(meshtastic_spec())
        .poll_interval(Duration::from_secs(5))
        .build();
    let bridge = Bridge::start(
        config,
        Arc::new(RecordingDispatcher::new()),
        Arc::new(MemoryContactStore::new()),
        factory,
    )
    .await
    .unwrap();
    let manager = bridge.manager(NetworkId::Meshtastic).unwrap().clone();
    assert_eq!(manager.snapshot().state, HealthState::Failed);

    radio.refuse_connects(false);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(manager.snapshot().state, HealthState::Connected);
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_same_device_conflict_before_open() {
    let factory = Arc::new(MockFactory::new());
    let config = BridgeConfigBuilder::new()
        .meshtastic(TransportSpec::serial("/dev/ttyUSB7"))
        .meshcore(TransportSpec::serial("/dev/ttyUSB7"))
        .build();
    let err = Bridge::start(
        config,
        Arc::new(RecordingDispatcher::new()),
        Arc::new(MemoryContactStore::new()),
        factory.clone(),
    )
    .await
    .err()
    .expect("conflict rejected");

    match &err {
        BridgeError::PortConflict { resource, .. } => assert!(resource.contains("ttyUSB7")),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(err.is_fatal());
    assert!(factory.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_radios() {
    let f = start(two_network_config()).await;
    let handle = f.bridge.handle();
    handle.shutdown().await.unwrap();
    f.bridge.wait().await;
    assert!(!f.mesh_a.is_connected());
    assert!(!f.mesh_b.is_connected());
}
