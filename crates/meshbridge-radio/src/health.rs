//! Connection health
//!
//! Each transport handle is owned by a [`ConnectionManager`], which runs the
//! reader loop and owns the reconnect procedure. Health bookkeeping lives in
//! [`HealthMonitor`], a plain state machine driven with explicit instants so
//! timing rules can be tested without a runtime.
//!
//! ```text
//!   Connecting ──► Connected ──silence / error──► Degraded
//!                     ▲                              │
//!                     │            reconnect launched▼
//!                     └────────── success ──── Recovering ──all attempts fail──► Failed
//! ```
//!
//! Reconnects are serialized per handle by a guard flag: a trigger arriving
//! while one is running is answered with [`ReconnectOutcome::AlreadyInProgress`]
//! and not queued. When whole reconnect cycles keep failing on a TCP link,
//! the manager escalates once: it asks the remote radio to reboot over a
//! fresh connection, waits for it to settle, then makes a final attempt.

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, trace, warn};

use async_trait::async_trait;
use meshbridge_core::{NetworkId, Packet, PayloadKind};

use crate::config::{HealthConfig, NetworkConfig, TransportSpec};
use crate::decoder::{ControlEvent, DecodedEvent, DecoderStats, ProtocolDecoder};
use crate::error::{BridgeError, ErrorClass, Result};
use crate::interface::{InboundFrame, InterfaceFactory, RadioInterface};
use crate::router::{Destination, LocalIdentities, OutboundTransport};
use crate::session;

/// Window used for the packets-per-minute figure
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

/// Per-handle connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Connecting,
    Connected,
    Degraded,
    Recovering,
    Failed,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Connecting => "connecting",
            HealthState::Connected => "connected",
            HealthState::Degraded => "degraded",
            HealthState::Recovering => "recovering",
            HealthState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a health poll concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    /// Connected and hearing traffic
    Healthy,
    /// Connected but nothing heard for longer than the silence timeout
    Silent,
    /// The proactive reconnect interval elapsed
    ScheduledReconnectDue,
    /// A transport error left the handle down, no reconnect running
    Degraded,
    /// A reconnect is running
    Recovering,
    /// Every reconnect attempt failed
    Failed,
}

impl HealthVerdict {
    /// Whether the supervisor should launch a reconnect
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            HealthVerdict::Silent
                | HealthVerdict::ScheduledReconnectDue
                | HealthVerdict::Degraded
                | HealthVerdict::Failed
        )
    }
}

/// Point-in-time health report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub network: NetworkId,
    pub interface: String,
    pub state: HealthState,
    pub verdict: HealthVerdict,
    /// Time since the last frame (or since connecting)
    pub silence_ms: u64,
    pub packets_per_minute: usize,
    /// Failed reconnect cycles in a row
    pub consecutive_failures: u32,
    pub escalated: bool,
}

/// Result of [`ConnectionManager::force_reconnect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Reconnected on attempt `attempts`
    Reconnected { attempts: u32 },
    /// Reconnected after a remote reboot
    Recovered,
    /// Every attempt failed
    Failed { attempts: u32 },
    /// Another reconnect owns the handle
    AlreadyInProgress,
}

/// Health bookkeeping for one handle
#[derive(Debug)]
pub struct HealthMonitor {
    network: NetworkId,
    config: HealthConfig,
    state: HealthState,
    connected_at: Option<Instant>,
    last_frame: Option<Instant>,
    last_scheduled: Option<Instant>,
    recent_packets: VecDeque<Instant>,
    consecutive_failures: u32,
}

impl HealthMonitor {
    pub fn new(network: NetworkId, config: &HealthConfig) -> Self {
        Self {
            network,
            config: config.clone(),
            state: HealthState::Connecting,
            connected_at: None,
            last_frame: None,
            last_scheduled: None,
            recent_packets: VecDeque::new(),
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn transition(&mut self, to: HealthState, reason: &str) {
        if self.state == to {
            return;
        }
        let from = self.state;
        self.state = to;
        match to {
            HealthState::Degraded | HealthState::Failed => {
                warn!(network = %self.network, %from, %to, reason, "Connection state changed")
            }
            _ => info!(network = %self.network, %from, %to, reason, "Connection state changed"),
        }
    }

    /// Link (re)established; silence and the schedule restart from `now`
    pub fn on_connected(&mut self, now: Instant) {
        self.connected_at = Some(now);
        self.last_frame = Some(now);
        self.last_scheduled = Some(now);
        self.consecutive_failures = 0;
        self.transition(HealthState::Connected, "link up");
    }

    /// Any frame arrived
    pub fn on_frame(&mut self, now: Instant) {
        self.last_frame = Some(now);
    }

    /// A mesh packet arrived
    pub fn on_packet(&mut self, now: Instant) {
        self.on_frame(now);
        self.recent_packets.push_back(now);
        self.trim(now);
    }

    /// Transport error on a live handle
    pub fn on_error(&mut self, reason: &str) {
        if matches!(self.state, HealthState::Connected | HealthState::Connecting) {
            self.transition(HealthState::Degraded, reason);
        }
    }

    /// A reconnect attempt is starting
    pub fn on_recovering(&mut self, reason: &str) {
        self.transition(HealthState::Recovering, reason);
    }

    /// One attempt failed; more may follow
    pub fn on_attempt_failed(&mut self, reason: &str) {
        self.transition(HealthState::Degraded, reason);
    }

    /// A whole reconnect cycle failed; returns the consecutive count
    pub fn on_cycle_failed(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    /// Give up until the next supervisor tick
    pub fn on_failed(&mut self, reason: &str) {
        self.transition(HealthState::Failed, reason);
    }

    fn trim(&mut self, now: Instant) {
        while self
            .recent_packets
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) > THROUGHPUT_WINDOW)
        {
            self.recent_packets.pop_front();
        }
    }

    /// Time since the last frame, or since connecting
    pub fn silence(&self, now: Instant) -> Duration {
        self.last_frame
            .or(self.connected_at)
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default()
    }

    /// Packets heard in the last minute
    pub fn packets_per_minute(&self, now: Instant) -> usize {
        self.recent_packets
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= THROUGHPUT_WINDOW)
            .count()
    }

    /// Verdict at `now` without acting on it
    pub fn verdict(&self, now: Instant) -> HealthVerdict {
        match self.state {
            HealthState::Failed => HealthVerdict::Failed,
            HealthState::Recovering | HealthState::Connecting => HealthVerdict::Recovering,
            HealthState::Degraded => HealthVerdict::Degraded,
            HealthState::Connected => {
                if self.silence(now) > self.config.silence_timeout {
                    return HealthVerdict::Silent;
                }
                let due = self.config.scheduled_reconnect.is_some_and(|every| {
                    self.last_scheduled
                        .map(|at| now.saturating_duration_since(at))
                        .unwrap_or_default()
                        >= every
                });
                if due {
                    HealthVerdict::ScheduledReconnectDue
                } else {
                    HealthVerdict::Healthy
                }
            }
        }
    }

    /// Judge the handle at `now`. Silence moves a connected handle to
    /// `Degraded`; a due schedule restarts its period.
    pub fn evaluate(&mut self, now: Instant) -> HealthVerdict {
        let verdict = self.verdict(now);
        match verdict {
            HealthVerdict::Silent => self.transition(HealthState::Degraded, "silence timeout"),
            HealthVerdict::ScheduledReconnectDue => self.last_scheduled = Some(now),
            _ => {}
        }
        verdict
    }
}

/// Clears the reconnect flag when the reconnect ends, however it ends
struct ReconnectGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns one transport handle and keeps it alive
pub struct ConnectionManager {
    network: NetworkId,
    config: NetworkConfig,
    /// Resolved transport (auto queries already mapped to a device)
    transport: TransportSpec,
    health: HealthConfig,
    interface: tokio::sync::Mutex<Box<dyn RadioInterface>>,
    name: String,
    monitor: parking_lot::Mutex<HealthMonitor>,
    reconnecting: AtomicBool,
    escalated: AtomicBool,
    factory: Arc<dyn InterfaceFactory>,
    decoder: ProtocolDecoder,
    local: Arc<LocalIdentities>,
    packets: mpsc::Sender<Packet>,
}

impl ConnectionManager {
    /// Create an unconnected manager; the handle is built through `factory`
    pub fn new(
        config: NetworkConfig,
        transport: TransportSpec,
        health: HealthConfig,
        factory: Arc<dyn InterfaceFactory>,
        decoder: ProtocolDecoder,
        local: Arc<LocalIdentities>,
        packets: mpsc::Sender<Packet>,
    ) -> Result<Self> {
        let interface = factory.create(&config, &transport, health.connect_timeout)?;
        let name = interface.name().to_string();
        Ok(Self {
            network: config.network,
            monitor: parking_lot::Mutex::new(HealthMonitor::new(config.network, &health)),
            config,
            transport,
            health,
            interface: tokio::sync::Mutex::new(interface),
            name,
            reconnecting: AtomicBool::new(false),
            escalated: AtomicBool::new(false),
            factory,
            decoder,
            local,
            packets,
        })
    }

    pub fn network(&self) -> NetworkId {
        self.network
    }

    /// Handle name for logs
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> HealthState {
        self.monitor.lock().state()
    }

    pub fn decoder_stats(&self) -> DecoderStats {
        self.decoder.stats()
    }

    /// First connect. Failure leaves the handle `Failed` for the supervisor
    /// to retry; it is not an error.
    pub async fn start(&self) {
        match timeout(self.health.reconnect_timeout, self.connect_once()).await {
            Ok(Ok(())) => self.monitor.lock().on_connected(Instant::now()),
            Ok(Err(e)) => {
                error!(network = %self.network, interface = %self.name, error = %e, "Initial connect failed");
                self.monitor.lock().on_failed("initial connect failed");
            }
            Err(_) => {
                error!(network = %self.network, interface = %self.name, "Initial connect timed out");
                self.monitor.lock().on_failed("initial connect timed out");
            }
        }
    }

    async fn connect_once(&self) -> Result<()> {
        let mut iface = self.interface.lock().await;
        if iface.is_connected() {
            if let Err(e) = iface.disconnect().await {
                debug!(network = %self.network, error = %e, "Disconnect before reconnect failed");
            }
        }
        iface.connect().await?;
        for frame in session::handshake(self.network) {
            iface.write_frame(&frame).await?;
        }
        Ok(())
    }

    /// Write one payload on the live handle.
    ///
    /// Never waits out a reconnect: while one owns the handle, or the lock is
    /// not free within two read polls, the write fails with
    /// `ReconnectInProgress`.
    pub async fn write(&self, payload: &[u8]) -> Result<()> {
        if self.reconnecting.load(Ordering::Acquire) {
            return Err(BridgeError::ReconnectInProgress);
        }
        let result = {
            let Ok(mut iface) = timeout(self.health.read_poll * 2, self.interface.lock()).await
            else {
                debug!(network = %self.network, "Handle busy, write dropped");
                return Err(BridgeError::ReconnectInProgress);
            };
            if !iface.is_connected() {
                return Err(BridgeError::NotConnected);
            }
            let written = iface.write_frame(payload).await;
            written
        };
        if let Err(e) = &result {
            if e.is_retriable() {
                self.monitor.lock().on_error("write failed");
            }
        }
        result
    }

    /// Reader loop; runs until shutdown
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(network = %self.network, interface = %self.name, "Reader started");
        let poll = self.health.read_poll;

        while !*shutdown.borrow() {
            let state = self.state();
            let live = matches!(state, HealthState::Connected | HealthState::Connecting);
            if !live || self.reconnecting.load(Ordering::Acquire) {
                sleep(poll).await;
                continue;
            }

            let read = {
                let mut iface = self.interface.lock().await;
                let read = timeout(poll, iface.read_frame()).await;
                read
            };

            match read {
                Err(_) | Ok(Ok(None)) => {}
                Ok(Ok(Some(frame))) => self.handle_frame(frame).await,
                Ok(Err(e)) => self.on_read_error(e),
            }
        }
        info!(network = %self.network, "Reader stopped");
    }

    fn on_read_error(self: &Arc<Self>, e: BridgeError) {
        match e.class() {
            ErrorClass::Retryable => {
                warn!(network = %self.network, error = %e, code = e.error_code(), "Transport error")
            }
            ErrorClass::Fatal | ErrorClass::Unknown => {
                error!(network = %self.network, error = %e, code = e.error_code(), "Unexpected read error, treating as retryable")
            }
        }
        self.monitor.lock().on_error(e.error_code());
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.force_reconnect("transport error").await;
        });
    }

    async fn handle_frame(&self, frame: InboundFrame) {
        let binary = matches!(frame, InboundFrame::Binary(_));
        let Some(event) = self.decoder.process(frame).await else {
            self.monitor.lock().on_frame(Instant::now());
            return;
        };

        match event {
            DecodedEvent::Packet(packet) => {
                self.monitor.lock().on_packet(Instant::now());
                // Companion radios hand out queued messages one per request
                if binary && packet.kind == PayloadKind::TextMessage {
                    self.request_next_message().await;
                }
                if self.packets.send(packet).await.is_err() {
                    debug!(network = %self.network, "Router gone, dropping packet");
                }
            }
            DecodedEvent::Contact(contact) => {
                self.monitor.lock().on_frame(Instant::now());
                trace!(network = %self.network, node = contact.node_id, "Contact updated");
            }
            DecodedEvent::Control(control) => {
                self.monitor.lock().on_frame(Instant::now());
                self.react(control).await;
            }
            DecodedEvent::Malformed { .. } => self.monitor.lock().on_frame(Instant::now()),
        }
    }

    async fn request_next_message(&self) {
        if let Some(frame) = session::sync_next(self.network) {
            if let Err(e) = self.write(&frame).await {
                debug!(network = %self.network, error = %e, "Message sync request failed");
            }
        }
    }

    async fn react(&self, control: ControlEvent) {
        match control {
            ControlEvent::LocalNode { node_id, name, .. } => {
                self.local.register(self.network, node_id);
                if let Some(name) = name {
                    info!(network = %self.network, name = %name, "Radio identified");
                }
            }
            ControlEvent::MessagesWaiting => self.request_next_message().await,
            ControlEvent::NoMoreMessages => {
                trace!(network = %self.network, "Message queue drained");
            }
            ControlEvent::Rebooted => {
                warn!(network = %self.network, "Radio rebooted, repeating handshake");
                for frame in session::handshake(self.network) {
                    if let Err(e) = self.write(&frame).await {
                        warn!(network = %self.network, error = %e, "Handshake after reboot failed");
                        break;
                    }
                }
            }
            ControlEvent::ConfigComplete(id) => {
                info!(network = %self.network, id, "Radio configuration received");
            }
            ControlEvent::ContactsStart { count } => {
                debug!(network = %self.network, count, "Contact sync started");
            }
            ControlEvent::ContactsEnd => {
                info!(network = %self.network, "Contact sync complete");
            }
            ControlEvent::CommandError(code) => {
                debug!(network = %self.network, code, "Radio rejected command");
            }
            other => trace!(network = %self.network, event = ?other, "Control event"),
        }
    }

    fn snapshot_with(&self, monitor: &HealthMonitor, now: Instant, verdict: HealthVerdict) -> HealthSnapshot {
        HealthSnapshot {
            network: self.network,
            interface: self.name.clone(),
            state: monitor.state(),
            verdict,
            silence_ms: monitor.silence(now).as_millis() as u64,
            packets_per_minute: monitor.packets_per_minute(now),
            consecutive_failures: monitor.consecutive_failures(),
            escalated: self.escalated.load(Ordering::Relaxed),
        }
    }

    /// Current health without acting on it
    pub fn snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        let monitor = self.monitor.lock();
        self.snapshot_with(&monitor, now, monitor.verdict(now))
    }

    /// Non-blocking health check for the supervisor
    pub fn poll_health(&self) -> HealthSnapshot {
        let now = Instant::now();
        let snapshot = {
            let mut monitor = self.monitor.lock();
            let verdict = monitor.evaluate(now);
            self.snapshot_with(&monitor, now, verdict)
        };

        match snapshot.verdict {
            HealthVerdict::Healthy | HealthVerdict::Recovering => debug!(
                network = %self.network,
                state = %snapshot.state,
                silence_ms = snapshot.silence_ms,
                ppm = snapshot.packets_per_minute,
                "Health check"
            ),
            verdict => warn!(
                network = %self.network,
                state = %snapshot.state,
                verdict = ?verdict,
                silence_ms = snapshot.silence_ms,
                failures = snapshot.consecutive_failures,
                "Health check"
            ),
        }
        snapshot
    }

    /// Close the handle at shutdown
    pub async fn close(&self) {
        let mut iface = self.interface.lock().await;
        if iface.is_connected() {
            if let Err(e) = iface.disconnect().await {
                debug!(network = %self.network, error = %e, "Disconnect failed");
            }
        }
        info!(network = %self.network, interface = %self.name, "Connection closed");
    }

    /// Close and reopen the handle, retrying up to the configured limit
    pub async fn force_reconnect(&self, reason: &str) -> ReconnectOutcome {
        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(network = %self.network, reason, "Reconnect already in progress");
            return ReconnectOutcome::AlreadyInProgress;
        }
        let _guard = ReconnectGuard(&self.reconnecting);

        let max = self.health.max_reconnect_attempts.max(1);
        for attempt in 1..=max {
            self.monitor.lock().on_recovering(reason);
            info!(network = %self.network, attempt, max, reason, "Reconnecting");

            match timeout(self.health.reconnect_timeout, self.connect_once()).await {
                Ok(Ok(())) => {
                    self.monitor.lock().on_connected(Instant::now());
                    return ReconnectOutcome::Reconnected { attempts: attempt };
                }
                Ok(Err(e)) => {
                    warn!(network = %self.network, attempt, error = %e, "Reconnect attempt failed");
                }
                Err(_) => {
                    warn!(
                        network = %self.network,
                        attempt,
                        timeout_ms = self.health.reconnect_timeout.as_millis() as u64,
                        "Reconnect attempt timed out"
                    );
                }
            }
            self.monitor.lock().on_attempt_failed("reconnect attempt failed");
            if attempt < max {
                sleep(self.health.reconnect_delay).await;
            }
        }

        let failures = self.monitor.lock().on_cycle_failed();
        if failures >= self.health.escalate_after && self.config.remote_recovery {
            if let Some(outcome) = self.try_escalation().await {
                return outcome;
            }
        }

        self.monitor.lock().on_failed("reconnect attempts exhausted");
        ReconnectOutcome::Failed { attempts: max }
    }

    async fn try_escalation(&self) -> Option<ReconnectOutcome> {
        let Some((host, port)) = self.transport.remote_host() else {
            info!(network = %self.network, "No remote host for this transport, skipping remote recovery");
            return None;
        };
        if self.escalated.swap(true, Ordering::AcqRel) {
            debug!(network = %self.network, "Remote recovery already used for this handle");
            return None;
        }
        match self.escalate_recovery(host, port).await {
            Ok(()) => Some(ReconnectOutcome::Recovered),
            Err(e) => {
                error!(network = %self.network, error = %e, "Remote recovery failed");
                None
            }
        }
    }

    /// Reboot the remote radio over a fresh connection, wait, reconnect once
    pub async fn escalate_recovery(&self, host: &str, port: u16) -> Result<()> {
        let directive = session::reboot_directive(self.network, self.local.get(self.network))?;
        let target = TransportSpec::tcp(host, port);
        warn!(network = %self.network, target = %target, "Escalating: requesting remote reboot");

        let mut fresh = self
            .factory
            .create(&self.config, &target, self.health.connect_timeout)?;
        let send = async {
            fresh.connect().await?;
            fresh.write_frame(&directive).await?;
            fresh.disconnect().await
        };
        timeout(self.health.reboot_timeout, send)
            .await
            .map_err(|_| BridgeError::ConnectionTimeout {
                duration_ms: self.health.reboot_timeout.as_millis() as u64,
            })??;

        info!(
            network = %self.network,
            settle_secs = self.health.reboot_settle.as_secs(),
            "Reboot requested, waiting for radio"
        );
        sleep(self.health.reboot_settle).await;

        self.monitor.lock().on_recovering("post-reboot reconnect");
        match timeout(self.health.reconnect_timeout, self.connect_once()).await {
            Ok(Ok(())) => {
                self.monitor.lock().on_connected(Instant::now());
                info!(network = %self.network, "Recovered after remote reboot");
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::ConnectionTimeout {
                duration_ms: self.health.reconnect_timeout.as_millis() as u64,
            }),
        }
    }

    /// Keepalive for radios that drop idle clients
    pub async fn send_keepalive(&self) {
        if let Some(frame) = session::keepalive(self.network) {
            if let Err(e) = self.write(&frame).await {
                debug!(network = %self.network, error = %e, "Keepalive failed");
            }
        }
    }
}

#[async_trait]
impl OutboundTransport for ConnectionManager {
    fn network(&self) -> NetworkId {
        self.network
    }

    async fn send_text(&self, destination: Destination, text: &str) -> Result<()> {
        let frame = session::text_frame(self.network, &destination, text)?;
        self.write(&frame).await
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("network", &self.network)
            .field("interface", &self.name)
            .field("state", &self.state())
            .field("reconnecting", &self.reconnecting.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::IdentityResolver;
    use crate::test_utils::MockFactory;
    use meshbridge_state::MemoryContactStore;

    fn health() -> HealthConfig {
        HealthConfig {
            silence_timeout: Duration::from_secs(120),
            scheduled_reconnect: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_silence_degrades() {
        let mut m = HealthMonitor::new(NetworkId::Meshtastic, &health());
        let t0 = Instant::now();
        m.on_connected(t0);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(119)), HealthVerdict::Healthy);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(125)), HealthVerdict::Silent);
        assert_eq!(m.state(), HealthState::Degraded);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(126)), HealthVerdict::Degraded);
    }

    #[test]
    fn test_traffic_keeps_healthy() {
        let mut m = HealthMonitor::new(NetworkId::MeshCore, &health());
        let t0 = Instant::now();
        m.on_connected(t0);
        m.on_packet(t0 + Duration::from_secs(100));
        assert_eq!(m.evaluate(t0 + Duration::from_secs(200)), HealthVerdict::Healthy);
        assert_eq!(m.packets_per_minute(t0 + Duration::from_secs(130)), 1);
        assert_eq!(m.packets_per_minute(t0 + Duration::from_secs(161)), 0);
    }

    #[test]
    fn test_scheduled_reconnect() {
        let cfg = HealthConfig {
            scheduled_reconnect: Some(Duration::from_secs(180)),
            silence_timeout: Duration::from_secs(600),
            ..Default::default()
        };
        let mut m = HealthMonitor::new(NetworkId::Meshtastic, &cfg);
        let t0 = Instant::now();
        m.on_connected(t0);
        assert_eq!(m.evaluate(t0 + Duration::from_secs(179)), HealthVerdict::Healthy);
        assert_eq!(
            m.evaluate(t0 + Duration::from_secs(180)),
            HealthVerdict::ScheduledReconnectDue
        );
        // Marked; not due again right away
        assert_eq!(m.evaluate(t0 + Duration::from_secs(181)), HealthVerdict::Healthy);
    }

    #[test]
    fn test_failure_counting_resets_on_connect() {
        let mut m = HealthMonitor::new(NetworkId::MeshCore, &health());
        assert_eq!(m.on_cycle_failed(), 1);
        assert_eq!(m.on_cycle_failed(), 2);
        m.on_failed("exhausted");
        assert_eq!(m.evaluate(Instant::now()), HealthVerdict::Failed);
        m.on_connected(Instant::now());
        assert_eq!(m.consecutive_failures(), 0);
        assert_eq!(m.state(), HealthState::Connected);
    }

    #[test]
    fn test_error_only_degrades_live_handles() {
        let mut m = HealthMonitor::new(NetworkId::MeshCore, &health());
        m.on_failed("down");
        m.on_error("read failed");
        assert_eq!(m.state(), HealthState::Failed);
    }

    fn manager(factory: Arc<MockFactory>, net: NetworkConfig, cfg: HealthConfig) -> Arc<ConnectionManager> {
        let resolver = Arc::new(IdentityResolver::new(Arc::new(MemoryContactStore::new())));
        let local = Arc::new(LocalIdentities::new());
        let decoder = ProtocolDecoder::new(net.network, resolver, local.clone());
        let (tx, _rx) = mpsc::channel(16);
        let transport = net.transport.clone();
        Arc::new(
            ConnectionManager::new(net, transport, cfg, factory, decoder, local, tx).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_mutual_exclusion() {
        let factory = Arc::new(MockFactory::new());
        let net = NetworkConfig::new(NetworkId::MeshCore, TransportSpec::tcp("10.0.0.2", 5000));
        let mock = factory.handle(&net.transport);
        mock.set_connect_delay(Duration::from_secs(1));

        let mgr = manager(factory, net, health());
        let first = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.force_reconnect("test").await })
        };
        tokio::task::yield_now().await;

        assert_eq!(
            mgr.force_reconnect("second").await,
            ReconnectOutcome::AlreadyInProgress
        );
        assert_eq!(
            first.await.unwrap(),
            ReconnectOutcome::Reconnected { attempts: 1 }
        );
        assert_eq!(mock.connect_calls(), 1);
        assert_eq!(mgr.state(), HealthState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_serial_like_fails_without_escalation() {
        let factory = Arc::new(MockFactory::new());
        let net = NetworkConfig::new(
            NetworkId::MeshCore,
            TransportSpec::serial("/dev/ttyACM0"),
        );
        let mock = factory.handle(&net.transport);
        mock.refuse_connects(true);

        let cfg = HealthConfig {
            escalate_after: 1,
            ..health()
        };
        let mgr = manager(factory.clone(), net, cfg);
        assert_eq!(
            mgr.force_reconnect("test").await,
            ReconnectOutcome::Failed { attempts: 3 }
        );
        assert_eq!(mock.connect_calls(), 3);
        assert_eq!(mgr.state(), HealthState::Failed);
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_escalation_reboots_tcp_radio_once() {
        let factory = Arc::new(MockFactory::new());
        let net = NetworkConfig::new(NetworkId::MeshCore, TransportSpec::tcp("10.0.0.2", 5000));
        let mock = factory.handle(&net.transport);
        mock.fail_next_connects(3);

        let cfg = HealthConfig {
            escalate_after: 1,
            ..health()
        };
        let mgr = manager(factory.clone(), net, cfg);
        assert_eq!(mgr.force_reconnect("test").await, ReconnectOutcome::Recovered);
        assert!(mock
            .written()
            .iter()
            .any(|frame| frame == &crate::decoder::meshcore::reboot()));
        assert_eq!(mgr.state(), HealthState::Connected);
        assert!(mgr.poll_health().escalated);

        // Second exhausted cycle does not escalate again
        mock.refuse_connects(true);
        assert_eq!(
            mgr.force_reconnect("again").await,
            ReconnectOutcome::Failed { attempts: 3 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_does_not_wait_for_reconnect() {
        let factory = Arc::new(MockFactory::new());
        let net = NetworkConfig::new(NetworkId::Meshtastic, TransportSpec::tcp("10.0.0.1", 4403));
        let mock = factory.handle(&net.transport);
        let mgr = manager(factory, net, health());
        mgr.start().await;

        mock.set_connect_delay(Duration::from_secs(10));
        let reconnect = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.force_reconnect("slow radio").await })
        };
        tokio::task::yield_now().await;

        let started = Instant::now();
        let err = mgr
            .send_text(Destination::Channel(0), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ReconnectInProgress));
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(
            reconnect.await.unwrap(),
            ReconnectOutcome::Reconnected { attempts: 1 }
        );
        mgr.send_text(Destination::Channel(0), "hi").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_connect_holds_off_writes() {
        let factory = Arc::new(MockFactory::new());
        let net = NetworkConfig::new(NetworkId::MeshCore, TransportSpec::tcp("10.0.0.2", 5000));
        factory.handle(&net.transport).set_connect_delay(Duration::from_secs(10));
        let mgr = manager(factory, net, health());
        let connecting = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.start().await })
        };
        tokio::task::yield_now().await;

        let started = Instant::now();
        let err = mgr
            .send_text(Destination::Channel(0), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ReconnectInProgress));
        assert!(started.elapsed() <= health().read_poll * 2);
        connecting.await.unwrap();
        assert_eq!(mgr.state(), HealthState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_requires_connection() {
        let factory = Arc::new(MockFactory::new());
        let net = NetworkConfig::new(NetworkId::Meshtastic, TransportSpec::tcp("10.0.0.1", 4403));
        let mgr = manager(factory.clone(), net.clone(), health());
        let err = mgr
            .send_text(Destination::Channel(0), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));

        mgr.start().await;
        assert_eq!(mgr.state(), HealthState::Connected);
        mgr.send_text(Destination::Channel(0), "hi").await.unwrap();
        // handshake + text
        assert_eq!(factory.handle(&net.transport).written().len(), 2);
    }
}
