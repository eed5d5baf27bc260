//! meshbridge node - runs the Meshtastic/MeshCore bridge
//!
//! Wires a configuration file and/or command-line transports into a running
//! [`Bridge`], answers `ping` with `pong` on either network, and logs
//! periodic health statistics until Ctrl-C.

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use meshbridge_core::node::format_node_id;
use meshbridge_core::{CommandDispatcher, ContactStore, DispatchContext, NetworkId};
use meshbridge_radio::detect::{enumerate_devices, probe_common_paths};
use meshbridge_radio::{
    Bridge, BridgeConfig, BridgeHandle, DefaultInterfaceFactory, NetworkConfig, TransportSpec,
};
use meshbridge_state::{MemoryContactStore, SqliteContactStore};

#[derive(Parser, Debug)]
#[command(name = "meshbridge-node")]
#[command(about = "Bridge a Meshtastic radio and a MeshCore companion radio")]
struct Args {
    /// JSON configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Meshtastic transport: serial path, host[:port] or auto[:criteria]
    #[arg(long)]
    meshtastic: Option<TransportSpec>,

    /// MeshCore transport: serial path, host[:port] or auto[:criteria]
    #[arg(long)]
    meshcore: Option<TransportSpec>,

    /// SQLite contact database (contacts are kept in memory otherwise)
    #[arg(long)]
    contacts_db: Option<PathBuf>,

    /// Interval between statistics log lines
    #[arg(long, default_value = "5m", value_parser = humantime_duration)]
    stats_interval: Duration,

    /// List serial devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

fn humantime_duration(s: &str) -> Result<Duration, String> {
    s.parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(|e| e.to_string())
}

/// Liveness probe: `ping` addressed to us is answered with `pong`
struct PingDispatcher;

impl PingDispatcher {
    fn reply(ctx: &DispatchContext) -> Option<String> {
        ctx.text()
            .trim()
            .eq_ignore_ascii_case("ping")
            .then(|| "pong".to_string())
    }
}

#[async_trait]
impl CommandDispatcher for PingDispatcher {
    async fn on_direct_message(&self, ctx: &DispatchContext) -> Option<String> {
        info!(
            network = %ctx.network(),
            from = %format_node_id(ctx.from_id()),
            text = ctx.text(),
            "Direct message"
        );
        Self::reply(ctx)
    }

    async fn on_broadcast_message(&self, ctx: &DispatchContext) -> Option<String> {
        debug!(network = %ctx.network(), channel = ctx.packet.channel, text = ctx.text(), "Channel message");
        None
    }
}

/// Read the JSON file (if any) and apply command-line overrides
fn load_config(args: &Args) -> anyhow::Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => BridgeConfig::default(),
    };

    for (network, transport) in [
        (NetworkId::Meshtastic, &args.meshtastic),
        (NetworkId::MeshCore, &args.meshcore),
    ] {
        let Some(transport) = transport else {
            continue;
        };
        match config.networks.iter_mut().find(|n| n.network == network) {
            Some(existing) => existing.transport = transport.clone(),
            None => config
                .networks
                .push(NetworkConfig::new(network, transport.clone())),
        }
    }

    if let Some(db) = &args.contacts_db {
        config.contacts_db = Some(db.clone());
    }

    if config.networks.is_empty() {
        bail!("no radios configured: pass --config, --meshtastic or --meshcore");
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn read_config(path: &Path) -> anyhow::Result<BridgeConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

async fn open_store(config: &BridgeConfig) -> anyhow::Result<Arc<dyn ContactStore>> {
    match &config.contacts_db {
        Some(path) => {
            let store = SqliteContactStore::open(path)
                .await
                .with_context(|| format!("opening contact database {}", path.display()))?;
            info!(path = %path.display(), "Using SQLite contact store");
            Ok(Arc::new(store))
        }
        None => {
            info!("Using in-memory contact store");
            Ok(Arc::new(MemoryContactStore::new()))
        }
    }
}

fn list_devices() {
    let mut devices = enumerate_devices();
    for probed in probe_common_paths() {
        if !devices.iter().any(|d| d.path == probed.path) {
            devices.push(probed);
        }
    }
    if devices.is_empty() {
        println!("No serial devices found");
        return;
    }
    for device in devices {
        let marker = if device.is_likely_radio() { "*" } else { " " };
        println!("{marker} {}", device.describe());
    }
}

async fn log_stats(handle: &BridgeHandle) {
    let stats = match handle.stats().await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(error = %e, "Stats unavailable");
            return;
        }
    };
    for net in &stats.networks {
        info!(
            network = %net.health.network,
            state = %net.health.state,
            silence_ms = net.health.silence_ms,
            ppm = net.health.packets_per_minute,
            failures = net.health.consecutive_failures,
            "Radio health"
        );
    }
    info!(
        received = stats.router.received,
        direct = stats.router.dispatched_direct,
        broadcast = stats.router.dispatched_broadcast,
        suppressed = stats.router.suppressed,
        replies = stats.router.replies_sent,
        contacts = stats.contacts_cached,
        "Bridge stats"
    );
    if let Ok(json) = serde_json::to_string(&stats) {
        debug!(stats = %json, "Full stats");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.list_devices {
        list_devices();
        return Ok(());
    }

    let config = load_config(&args)?;
    info!(
        version = meshbridge_radio::VERSION,
        networks = config.networks.len(),
        "Starting meshbridge node"
    );
    for net in &config.networks {
        info!(network = %net.network, transport = %net.transport, "Configured radio");
    }

    let store = open_store(&config).await?;
    let bridge = Bridge::start(
        config,
        Arc::new(PingDispatcher),
        store,
        Arc::new(DefaultInterfaceFactory),
    )
    .await
    .context("starting bridge")?;
    let handle = bridge.handle();

    let mut ticker = tokio::time::interval(args.stats_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => log_stats(&handle).await,
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl-C")?;
                info!("Shutting down");
                break;
            }
        }
    }

    log_stats(&handle).await;
    handle.shutdown().await.context("stopping bridge")?;
    bridge.wait().await;
    info!("Bridge stopped");
    Ok(())
}
