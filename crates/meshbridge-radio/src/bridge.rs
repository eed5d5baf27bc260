//! Bridge - startup, supervision and shutdown
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              Bridge                               │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  ┌────────────────────┐                                           │
//! │  │ ConnectionManager  │──┐                                        │
//! │  │ (meshtastic)       │  │  mpsc<Packet>   ┌──────────┐           │
//! │  └────────────────────┘  ├────────────────►│  Router  │──► CommandDispatcher
//! │  ┌────────────────────┐  │                 │          │           │
//! │  │ ConnectionManager  │──┘◄────replies─────│          │           │
//! │  │ (meshcore)         │                    └──────────┘           │
//! │  └────────────────────┘                                           │
//! │            ▲                                                      │
//! │            │ poll_health / force_reconnect                        │
//! │      ┌─────┴──────┐      ┌───────────────┐                        │
//! │      │ Supervisor │      │ Command loop  │◄── BridgeHandle        │
//! │      └────────────┘      └───────────────┘                        │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Startup fails only on configuration errors: duplicate networks, transport
//! conflicts and devices that cannot be resolved are all reported before any
//! handle is opened. A radio that is merely unreachable starts `Failed` and
//! is retried by the supervisor.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};

use meshbridge_core::{CommandDispatcher, ContactStore, NetworkId, OutboundMessage, SendOutcome};

use crate::config::{check_conflicts, BridgeConfig, TransportSpec};
use crate::decoder::{DecoderStats, IdentityResolver, ProtocolDecoder, ResolverStats};
use crate::dedup::DedupStats;
use crate::error::{BridgeError, Result};
use crate::health::{ConnectionManager, HealthSnapshot, HealthVerdict};
use crate::interface::InterfaceFactory;
use crate::router::{LocalIdentities, Router, RouterStats};

/// Commands that can be sent to the bridge
#[derive(Debug)]
pub enum BridgeCommand {
    /// Route an outbound message
    SendReply(OutboundMessage, oneshot::Sender<SendOutcome>),
    /// Get bridge statistics
    GetStats(oneshot::Sender<BridgeStats>),
    /// Shutdown the bridge
    Shutdown,
}

/// Per-network statistics
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStats {
    pub health: HealthSnapshot,
    pub decoder: DecoderStats,
}

/// Bridge statistics
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub networks: Vec<NetworkStats>,
    pub router: RouterStats,
    pub resolver: ResolverStats,
    pub dedup: DedupStats,
    /// Contacts held in the resolver cache
    pub contacts_cached: usize,
}

impl BridgeStats {
    /// Stats for one network
    pub fn network(&self, id: NetworkId) -> Option<&NetworkStats> {
        self.networks.iter().find(|n| n.health.network == id)
    }
}

/// Handle for controlling a running [`Bridge`]
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    command_tx: mpsc::Sender<BridgeCommand>,
}

impl BridgeHandle {
    /// Route a reply (or unsolicited message) to the right network
    pub async fn send_reply(&self, msg: OutboundMessage) -> Result<SendOutcome> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::SendReply(msg, tx))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Get bridge statistics
    pub async fn stats(&self) -> Result<BridgeStats> {
        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(BridgeCommand::GetStats(tx))
            .await
            .map_err(|_| BridgeError::ChannelClosed)?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    /// Shutdown the bridge
    pub async fn shutdown(&self) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Shutdown)
            .await
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Shared pieces the command loop and supervisor work on
struct Core {
    managers: Vec<Arc<ConnectionManager>>,
    router: Arc<Router>,
    resolver: Arc<IdentityResolver>,
}

impl Core {
    fn stats(&self) -> BridgeStats {
        BridgeStats {
            networks: self
                .managers
                .iter()
                .map(|m| NetworkStats {
                    health: m.snapshot(),
                    decoder: m.decoder_stats(),
                })
                .collect(),
            router: self.router.stats(),
            resolver: self.resolver.stats(),
            dedup: self.router.dedup().stats(),
            contacts_cached: self.resolver.cached_contacts(),
        }
    }
}

/// A running two-network bridge
pub struct Bridge {
    handle: BridgeHandle,
    tasks: Vec<JoinHandle<()>>,
    managers: Vec<Arc<ConnectionManager>>,
}

impl Bridge {
    /// Validate `config`, open every handle and start all tasks.
    ///
    /// Returns only configuration errors; unreachable radios are retried in
    /// the background.
    pub async fn start(
        config: BridgeConfig,
        dispatcher: Arc<dyn CommandDispatcher>,
        store: Arc<dyn ContactStore>,
        factory: Arc<dyn InterfaceFactory>,
    ) -> Result<Self> {
        config.validate()?;

        // Resolve auto specs now so a device claimed twice is caught before
        // anything is opened
        let mut resolved: Vec<(usize, TransportSpec)> = Vec::with_capacity(config.networks.len());
        for (i, net) in config.networks.iter().enumerate() {
            let spec = net.transport.resolve()?;
            if net.transport.is_auto() {
                info!(network = %net.network, query = %net.transport, device = %spec, "Resolved device");
            }
            resolved.push((i, spec));
        }
        check_conflicts(
            resolved
                .iter()
                .map(|(i, spec)| (config.networks[*i].network, spec)),
        )?;

        let resolver = Arc::new(IdentityResolver::new(store));
        let warmed = resolver.warm().await;
        info!(contacts = warmed, "Contact cache loaded");

        let local = Arc::new(LocalIdentities::from_config(&config));
        let router = Arc::new(Router::new(&config, local.clone(), resolver.clone(), dispatcher));
        let (packet_tx, packet_rx) = mpsc::channel(config.router.queue_size);

        let mut managers = Vec::with_capacity(resolved.len());
        for (i, spec) in resolved {
            let net = config.networks[i].clone();
            let decoder = ProtocolDecoder::new(net.network, resolver.clone(), local.clone());
            let manager = Arc::new(ConnectionManager::new(
                net,
                spec,
                config.health.clone(),
                factory.clone(),
                decoder,
                local.clone(),
                packet_tx.clone(),
            )?);
            router.register_transport(manager.clone());
            managers.push(manager);
        }
        drop(packet_tx);

        for manager in &managers {
            manager
                .start()
                .instrument(info_span!("connect", network = %manager.network()))
                .await;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (command_tx, command_rx) = mpsc::channel(config.router.command_queue_size);
        let core = Arc::new(Core {
            managers: managers.clone(),
            router: router.clone(),
            resolver,
        });

        let mut tasks = Vec::with_capacity(managers.len() + 3);
        for manager in &managers {
            let span = info_span!("reader", network = %manager.network());
            tasks.push(tokio::spawn(
                manager.clone().run(shutdown_rx.clone()).instrument(span),
            ));
        }
        {
            let router = router.clone();
            let shutdown = shutdown_rx.clone();
            tasks.push(tokio::spawn(
                async move { router.run(packet_rx, shutdown).await }
                    .instrument(info_span!("router")),
            ));
        }
        tasks.push(tokio::spawn(
            supervise(core.clone(), config.health.poll_interval, shutdown_rx.clone())
                .instrument(info_span!("supervisor")),
        ));
        tasks.push(tokio::spawn(
            command_loop(core, command_rx, shutdown_tx).instrument(info_span!("commands")),
        ));

        info!(networks = managers.len(), "Bridge started");
        Ok(Self {
            handle: BridgeHandle { command_tx },
            tasks,
            managers,
        })
    }

    /// Handle for sending commands
    pub fn handle(&self) -> BridgeHandle {
        self.handle.clone()
    }

    /// Manager for one network
    pub fn manager(&self, network: NetworkId) -> Option<&Arc<ConnectionManager>> {
        self.managers.iter().find(|m| m.network() == network)
    }

    /// Wait for every task to finish, then close the handles
    pub async fn wait(self) {
        let Bridge {
            handle,
            tasks,
            managers,
        } = self;
        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Bridge task panicked");
            }
        }
        drop(handle);
        join_all(managers.iter().map(|m| m.close())).await;
        info!("Bridge stopped");
    }
}

async fn supervise(core: Arc<Core>, every: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval_at(Instant::now() + every, every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tick.tick() => {}
        }

        for manager in &core.managers {
            let snapshot = manager.poll_health();
            let reason = match snapshot.verdict {
                HealthVerdict::Healthy => {
                    let manager = manager.clone();
                    tokio::spawn(async move { manager.send_keepalive().await });
                    continue;
                }
                HealthVerdict::Recovering => continue,
                HealthVerdict::Silent => "silence timeout",
                HealthVerdict::ScheduledReconnectDue => "scheduled reconnect",
                HealthVerdict::Degraded => "degraded",
                HealthVerdict::Failed => "retrying failed connection",
            };
            let manager = manager.clone();
            let span = info_span!("reconnect", network = %manager.network());
            tokio::spawn(
                async move {
                    let outcome = manager.force_reconnect(reason).await;
                    debug!(?outcome, "Reconnect finished");
                }
                .instrument(span),
            );
        }

        let router = core.router.stats();
        debug!(
            received = router.received,
            direct = router.dispatched_direct,
            broadcast = router.dispatched_broadcast,
            suppressed = router.suppressed,
            replies = router.replies_sent,
            "Bridge stats"
        );
    }
    info!("Supervisor stopped");
}

async fn command_loop(
    core: Arc<Core>,
    mut commands: mpsc::Receiver<BridgeCommand>,
    shutdown: watch::Sender<bool>,
) {
    while let Some(cmd) = commands.recv().await {
        match cmd {
            BridgeCommand::SendReply(msg, tx) => {
                let outcome = core.router.send(msg).await;
                let _ = tx.send(outcome);
            }
            BridgeCommand::GetStats(tx) => {
                let _ = tx.send(core.stats());
            }
            BridgeCommand::Shutdown => {
                info!("Bridge shutdown requested");
                break;
            }
        }
    }
    if shutdown.send(true).is_err() {
        warn!("No tasks left to stop");
    }
}
