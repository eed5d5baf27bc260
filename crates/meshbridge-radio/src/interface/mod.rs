//! Transport handles for radio communication
//!
//! - [`serial::SerialInterface`] - Serial port communication (requires `serial` feature)
//! - [`tcp::TcpInterface`] - TCP connection to a networked radio
//!
//! A handle owns byte I/O and frame delimiting only; decoding happens in
//! [`crate::decoder`].
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   # Ubuntu/Debian
//!   apt install libudev-dev pkg-config
//!   ```

pub mod framing;
#[cfg(feature = "serial")]
mod serial;
mod tcp;

#[cfg(feature = "serial")]
pub use serial::SerialInterface;
pub use tcp::TcpInterface;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use meshbridge_core::NetworkId;

use crate::config::{NetworkConfig, TransportSpec};
use crate::decoder::LibraryEvent;
use crate::error::{BridgeError, Result};

/// One unit handed from a transport to the decoder
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// Delimited binary frame (header stripped)
    Binary(Bytes),
    /// Event already parsed by a transport library
    Event(LibraryEvent),
}

/// Trait for radio transport handles
///
/// Abstracts over serial and TCP links, providing a unified API for reading
/// and writing frames.
#[async_trait]
pub trait RadioInterface: Send + Sync {
    /// Open the link
    async fn connect(&mut self) -> Result<()>;

    /// Close the link
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if currently connected
    fn is_connected(&self) -> bool;

    /// Wait for the next frame.
    ///
    /// Must be cancel-safe: the caller bounds each read with a timeout and
    /// partial frames stay buffered across calls. Returns `Err` on
    /// connection/read errors.
    async fn read_frame(&mut self) -> Result<Option<InboundFrame>>;

    /// Frame and write a payload
    async fn write_frame(&mut self, payload: &[u8]) -> Result<()>;

    /// Get the interface name (for logging)
    fn name(&self) -> &str;
}

/// Connection state for interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Successfully connected
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Creates transport handles.
///
/// The bridge opens every handle through a factory so that startup can be
/// exercised without hardware.
pub trait InterfaceFactory: Send + Sync {
    /// Build an unconnected handle for `transport` (already resolved when
    /// the configured spec was `auto`)
    fn create(
        &self,
        net: &NetworkConfig,
        transport: &TransportSpec,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RadioInterface>>;
}

/// Factory for real serial and TCP handles
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultInterfaceFactory;

impl InterfaceFactory for DefaultInterfaceFactory {
    fn create(
        &self,
        net: &NetworkConfig,
        transport: &TransportSpec,
        connect_timeout: Duration,
    ) -> Result<Box<dyn RadioInterface>> {
        open(net.network, transport, &net.transport, net.baud_rate, connect_timeout)
    }
}

/// Build a handle for a resolved transport.
///
/// `configured` is the spec as written; an auto query there is re-resolved
/// on every reconnect because radios re-enumerate after a reboot.
pub fn open(
    network: NetworkId,
    transport: &TransportSpec,
    configured: &TransportSpec,
    baud_rate: u32,
    connect_timeout: Duration,
) -> Result<Box<dyn RadioInterface>> {
    match transport {
        TransportSpec::Tcp { host, port } => Ok(Box::new(
            TcpInterface::new(network, host.clone(), *port).with_timeout(connect_timeout),
        )),
        #[cfg(feature = "serial")]
        TransportSpec::Serial(path) => {
            let mut iface = SerialInterface::new(network, path)
                .with_baud_rate(baud_rate)
                .with_timeout(connect_timeout);
            if let TransportSpec::Auto(query) = configured {
                iface = iface.with_auto_query(query.clone());
            }
            Ok(Box::new(iface))
        }
        #[cfg(not(feature = "serial"))]
        TransportSpec::Serial(path) => {
            let _ = (configured, baud_rate);
            Err(BridgeError::InvalidConfig(format!(
                "{} is a serial device but serial support is not enabled",
                path.display()
            )))
        }
        TransportSpec::Auto(query) => Err(BridgeError::InvalidConfig(format!(
            "{query} must be resolved before opening"
        ))),
    }
}
