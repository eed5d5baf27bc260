//! Two-network LoRa mesh bridge
//!
//! Keeps one Meshtastic radio and one MeshCore companion radio connected,
//! decodes what they hear into normalized packets, hands messages addressed
//! to us to a [`CommandDispatcher`](meshbridge_core::CommandDispatcher) and
//! sends its replies back out on the network the request came from.
//!
//! # Architecture
//!
//! The bridge operates in four layers:
//!
//! 1. **Transport** - serial or TCP handle per radio ([`interface`])
//! 2. **Decoding** - frames to packets, sender identity resolution ([`decoder`])
//! 3. **Health** - reader task, silence detection, reconnects, remote reboot ([`health`])
//! 4. **Routing** - ownership, broadcast echo suppression, reply routing ([`router`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use meshbridge_radio::{Bridge, BridgeConfigBuilder, DefaultInterfaceFactory, TransportSpec};
//! use meshbridge_state::MemoryContactStore;
//!
//! let config = BridgeConfigBuilder::new()
//!     .meshtastic(TransportSpec::tcp("10.0.0.5", 4403))
//!     .meshcore("auto:product=T-Echo".parse()?)
//!     .build();
//!
//! let bridge = Bridge::start(
//!     config,
//!     Arc::new(MyDispatcher),
//!     Arc::new(MemoryContactStore::new()),
//!     Arc::new(DefaultInterfaceFactory),
//! )
//! .await?;
//!
//! let handle = bridge.handle();
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await?;
//! bridge.wait().await;
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port interface and USB auto-detection (requires
//!   `libudev-dev` on Linux)
//!
//! # Frame Formats
//!
//! Meshtastic stream framing: magic `0x94C3`, big-endian u16 length,
//! protobuf payload. MeshCore companion framing: `<` (to radio) or `>`
//! (from radio), little-endian u16 length, payload. Both are used unchanged
//! over TCP.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod detect;
pub mod error;
pub mod interface;

pub mod decoder;
pub mod dedup;
pub mod router;

pub mod health;
pub mod session;

pub mod bridge;

pub mod test_utils;

pub use config::{
    BridgeConfig, BridgeConfigBuilder, DedupConfig, HealthConfig, NetworkConfig, RouterConfig,
    TransportSpec,
};
pub use error::{BridgeError, ErrorClass, Result};
pub use interface::{
    ConnectionState, DefaultInterfaceFactory, InboundFrame, InterfaceFactory, RadioInterface,
    TcpInterface,
};

#[cfg(feature = "serial")]
pub use interface::SerialInterface;

pub use decoder::{
    ControlEvent, DecodedEvent, DecoderStats, FieldAliases, IdentityResolver, LibraryEvent,
    ProtocolDecoder, Resolution, ResolverStats,
};
pub use dedup::{BroadcastDedup, ContentHash, DedupStats};
pub use detect::{AutoDetectQuery, DeviceCriterion, DeviceInfo};
pub use router::{
    Destination, LocalIdentities, OutboundTransport, RouteRecord, Router, RouterStats,
    SenderRoutes,
};

pub use health::{
    ConnectionManager, HealthMonitor, HealthSnapshot, HealthState, HealthVerdict,
    ReconnectOutcome,
};

pub use bridge::{Bridge, BridgeCommand, BridgeHandle, BridgeStats, NetworkStats};

pub use test_utils::{MockFactory, MockHandle, MockInterface, RecordingDispatcher};

pub use config::{
    DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, LORA_MAX_PAYLOAD, MESHCORE_MAX_TEXT,
    MESHCORE_TCP_PORT, MESHTASTIC_MAGIC, MESHTASTIC_TCP_PORT,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
