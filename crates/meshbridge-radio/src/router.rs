//! Message routing and reply delivery
//!
//! The router sits between the connection managers and the command
//! dispatcher:
//!
//! ```text
//!   readers ──mpsc<Packet>──► Router ──► CommandDispatcher
//!                               │  ▲            │
//!                               │  └── reply ───┘
//!                               ▼
//!                     OutboundTransport (per network)
//! ```
//!
//! For each packet it decides ownership, suppresses echoes of our own
//! broadcasts, records which network the sender was last heard on, and
//! dispatches by [`MessageShape`]. Replies follow the sender route record,
//! never a caller's guess.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use meshbridge_core::node::{self, format_node_id};
use meshbridge_core::{
    CommandDispatcher, DispatchContext, MessageShape, NetworkId, NodeId, OutboundMessage, Packet,
    SendFailure, SendOutcome, BROADCAST_NODE_ID,
};

use crate::config::{max_text_bytes, BridgeConfig};
use crate::decoder::IdentityResolver;
use crate::dedup::BroadcastDedup;
use crate::error::Result;

/// Node ids owned by this bridge, one per network
#[derive(Debug, Default)]
pub struct LocalIdentities {
    ids: RwLock<HashMap<NetworkId, NodeId>>,
}

impl LocalIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from configured ids
    pub fn from_config(config: &BridgeConfig) -> Self {
        let local = Self::new();
        for net in &config.networks {
            if let Some(id) = net.local_node_id {
                local.register(net.network, id);
            }
        }
        local
    }

    /// Record the local id for a network; the radio's report replaces any
    /// configured value
    pub fn register(&self, network: NetworkId, node_id: NodeId) {
        if node::is_unknown(node_id) || node::is_broadcast(node_id) {
            return;
        }
        let previous = self.ids.write().insert(network, node_id);
        if previous != Some(node_id) {
            info!(
                network = %network,
                node = %format_node_id(node_id),
                "Registered local node"
            );
        }
    }

    /// Local id on a network
    pub fn get(&self, network: NetworkId) -> Option<NodeId> {
        self.ids.read().get(&network).copied()
    }

    /// Whether `node_id` is ours on any network
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.ids.read().values().any(|id| *id == node_id)
    }
}

/// Where a sender was last heard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub network: NetworkId,
    pub pubkey_prefix: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Last-write-wins map from sender to its most recent network
#[derive(Debug, Default)]
pub struct SenderRoutes {
    routes: RwLock<HashMap<NodeId, RouteRecord>>,
}

impl SenderRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. A missing prefix keeps the known one when the
    /// network is unchanged.
    pub fn record(&self, node_id: NodeId, network: NetworkId, pubkey_prefix: Option<&str>) {
        let mut routes = self.routes.write();
        let kept_prefix = routes
            .get(&node_id)
            .filter(|r| r.network == network)
            .and_then(|r| r.pubkey_prefix.clone());
        let previous = routes.insert(
            node_id,
            RouteRecord {
                network,
                pubkey_prefix: pubkey_prefix.map(str::to_string).or(kept_prefix),
                updated_at: Utc::now(),
            },
        );
        if let Some(prev) = previous.filter(|p| p.network != network) {
            debug!(
                node = %format_node_id(node_id),
                from = %prev.network,
                to = %network,
                "Sender moved networks"
            );
        }
    }

    pub fn get(&self, node_id: NodeId) -> Option<RouteRecord> {
        self.routes.read().get(&node_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reply destination as seen by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// One node; key-addressed networks need the prefix
    Node {
        node_id: NodeId,
        pubkey_prefix: Option<String>,
        channel: u8,
    },
    /// A channel broadcast
    Channel(u8),
}

/// Something that can put text on a network
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Network served
    fn network(&self) -> NetworkId;

    /// Write a text message
    async fn send_text(&self, destination: Destination, text: &str) -> Result<()>;
}

/// Router counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    pub received: u64,
    pub dispatched_direct: u64,
    pub dispatched_broadcast: u64,
    pub unknown_payloads: u64,
    pub foreign: u64,
    pub suppressed: u64,
    pub replies_sent: u64,
    pub replies_failed: u64,
    pub routes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    dispatched_direct: AtomicU64,
    dispatched_broadcast: AtomicU64,
    unknown_payloads: AtomicU64,
    foreign: AtomicU64,
    suppressed: AtomicU64,
    replies_sent: AtomicU64,
    replies_failed: AtomicU64,
}

/// Cut `text` to at most `max` bytes on a char boundary
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Routes inbound packets to the dispatcher and replies to transports
pub struct Router {
    local: Arc<LocalIdentities>,
    accept_broadcasts: HashMap<NetworkId, bool>,
    routes: SenderRoutes,
    dedup: BroadcastDedup,
    resolver: Arc<IdentityResolver>,
    dispatcher: Arc<dyn CommandDispatcher>,
    transports: RwLock<HashMap<NetworkId, Arc<dyn OutboundTransport>>>,
    counters: Counters,
}

impl Router {
    pub fn new(
        config: &BridgeConfig,
        local: Arc<LocalIdentities>,
        resolver: Arc<IdentityResolver>,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        let accept_broadcasts = config
            .networks
            .iter()
            .map(|n| (n.network, n.accept_broadcasts))
            .collect();
        Self {
            local,
            accept_broadcasts,
            routes: SenderRoutes::new(),
            dedup: BroadcastDedup::from_config(&config.dedup),
            resolver,
            dispatcher,
            transports: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Attach the transport serving a network
    pub fn register_transport(&self, transport: Arc<dyn OutboundTransport>) {
        self.transports.write().insert(transport.network(), transport);
    }

    /// Sender route table
    pub fn routes(&self) -> &SenderRoutes {
        &self.routes
    }

    /// Broadcast echo table
    pub fn dedup(&self) -> &BroadcastDedup {
        &self.dedup
    }

    fn is_ours(&self, packet: &Packet) -> bool {
        if packet.addressed_to_local || self.local.contains(packet.to_id) {
            return true;
        }
        packet.is_broadcast
            && self
                .accept_broadcasts
                .get(&packet.network)
                .copied()
                .unwrap_or(true)
    }

    /// Route one packet; replies are sent before returning
    pub async fn handle_packet(&self, packet: Packet) {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if !packet.sender_unknown() {
            self.routes.record(
                packet.from_id,
                packet.network,
                packet.sender_key_prefix.as_deref(),
            );
        }
        if packet.kind.is_unknown() {
            self.counters.unknown_payloads.fetch_add(1, Ordering::Relaxed);
        }

        if !self.is_ours(&packet) {
            self.counters.foreign.fetch_add(1, Ordering::Relaxed);
            trace!(
                network = %packet.network,
                to = %format_node_id(packet.to_id),
                kind = %packet.kind,
                "Foreign packet"
            );
            return;
        }

        let shape = packet.shape();
        if shape == MessageShape::BroadcastMessage {
            let text = packet.text_body().unwrap_or_default();
            if self.dedup.should_suppress(packet.network, text) {
                self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let contact = if packet.sender_unknown() {
            None
        } else {
            self.resolver.contact_for(packet.network, packet.from_id).await
        };
        let ctx = DispatchContext {
            packet,
            shape,
            contact,
        };

        match shape {
            MessageShape::DirectMessage => {
                self.counters.dispatched_direct.fetch_add(1, Ordering::Relaxed);
                if let Some(reply) = self.dispatcher.on_direct_message(&ctx).await {
                    let msg = OutboundMessage::reply_to(ctx.packet.from_id, reply)
                        .on_network(ctx.packet.network)
                        .on_channel(ctx.packet.channel);
                    self.send(msg).await;
                }
            }
            MessageShape::BroadcastMessage => {
                self.counters.dispatched_broadcast.fetch_add(1, Ordering::Relaxed);
                if let Some(reply) = self.dispatcher.on_broadcast_message(&ctx).await {
                    let msg =
                        OutboundMessage::broadcast(ctx.packet.network, ctx.packet.channel, reply);
                    self.send(msg).await;
                }
            }
            MessageShape::UnknownPayload => {
                self.dispatcher.on_unknown_payload(&ctx).await;
            }
        }
    }

    /// Deliver a reply or announcement
    pub async fn send(&self, msg: OutboundMessage) -> SendOutcome {
        let outcome = match self.plan(&msg).await {
            Ok((network, destination, to_id)) => {
                self.deliver(network, destination, to_id, &msg.text).await
            }
            Err(failure) => SendOutcome::Failed(failure),
        };

        match &outcome {
            SendOutcome::Sent { network, to_id } => {
                self.counters.replies_sent.fetch_add(1, Ordering::Relaxed);
                debug!(network = %network, to = %format_node_id(*to_id), "Reply sent");
            }
            SendOutcome::Failed(failure) => {
                self.counters.replies_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    to = %format_node_id(msg.target_from_id),
                    error = %failure,
                    "Reply not sent"
                );
            }
        }
        outcome
    }

    async fn plan(
        &self,
        msg: &OutboundMessage,
    ) -> std::result::Result<(NetworkId, Destination, NodeId), SendFailure> {
        if msg.is_broadcast() {
            let network = msg.network_id.ok_or(SendFailure::MissingNetwork)?;
            return Ok((network, Destination::Channel(msg.channel), BROADCAST_NODE_ID));
        }

        let target = msg.target_from_id;
        if node::is_unknown(target) {
            return Err(SendFailure::UnresolvedSender);
        }
        let route = self.routes.get(target).ok_or(SendFailure::NoRoute(target))?;
        if let Some(hint) = msg.network_id.filter(|hint| *hint != route.network) {
            debug!(
                to = %format_node_id(target),
                hint = %hint,
                route = %route.network,
                "Route record overrides network hint"
            );
        }

        let pubkey_prefix = if route.network.uses_key_addressing() {
            let prefix = match route.pubkey_prefix.clone().or_else(|| msg.pubkey_prefix.clone()) {
                Some(prefix) => Some(prefix),
                None => self
                    .resolver
                    .contact_for(route.network, target)
                    .await
                    .and_then(|c| c.lookup_prefix()),
            };
            Some(prefix.ok_or(SendFailure::MissingPublicKey(target))?)
        } else {
            None
        };

        Ok((
            route.network,
            Destination::Node {
                node_id: target,
                pubkey_prefix,
                channel: msg.channel,
            },
            target,
        ))
    }

    async fn deliver(
        &self,
        network: NetworkId,
        destination: Destination,
        to_id: NodeId,
        text: &str,
    ) -> SendOutcome {
        let transport = self.transports.read().get(&network).cloned();
        let Some(transport) = transport else {
            return SendOutcome::Failed(SendFailure::NetworkUnavailable(network));
        };

        let max = max_text_bytes(network);
        let body = truncate_utf8(text, max);
        if body.len() < text.len() {
            warn!(
                network = %network,
                size = text.len(),
                max,
                "Reply truncated to fit a radio packet"
            );
        }

        let is_channel = matches!(destination, Destination::Channel(_));
        match transport.send_text(destination, body).await {
            Ok(()) => {
                if is_channel {
                    self.dedup.record(network, body);
                }
                SendOutcome::Sent { network, to_id }
            }
            Err(e) => SendOutcome::Failed(SendFailure::Transport(e.to_string())),
        }
    }

    /// Consume packets until shutdown or every sender is gone
    pub async fn run(&self, mut packets: mpsc::Receiver<Packet>, mut shutdown: watch::Receiver<bool>) {
        info!("Router started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                maybe = packets.recv() => match maybe {
                    Some(packet) => self.handle_packet(packet).await,
                    None => break,
                },
            }
        }
        info!("Router stopped");
    }

    /// Current counters
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            received: self.counters.received.load(Ordering::Relaxed),
            dispatched_direct: self.counters.dispatched_direct.load(Ordering::Relaxed),
            dispatched_broadcast: self.counters.dispatched_broadcast.load(Ordering::Relaxed),
            unknown_payloads: self.counters.unknown_payloads.load(Ordering::Relaxed),
            foreign: self.counters.foreign.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            replies_sent: self.counters.replies_sent.load(Ordering::Relaxed),
            replies_failed: self.counters.replies_failed.load(Ordering::Relaxed),
            routes: self.routes.len() as u64,
        }
    }
}
