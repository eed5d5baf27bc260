//! Serial port interface for USB-attached radios
//!
//! Async serial communication using tokio-serial. Framing follows the
//! network the radio belongs to (see [`super::framing`]). A handle created
//! from an `auto` query re-runs device detection on every connect.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, error, info, trace, warn};

use meshbridge_core::NetworkId;

use super::framing::{FrameDecoder, FrameFormat};
use super::{ConnectionState, InboundFrame, RadioInterface};
use crate::config::{DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS};
use crate::detect::{self, AutoDetectQuery};
use crate::error::{BridgeError, Result};

/// Buffer size for reading from serial port
const READ_BUFFER_SIZE: usize = 512;

/// Serial interface for radio communication
pub struct SerialInterface {
    network: NetworkId,

    /// Serial port path
    port_path: PathBuf,

    /// Query to re-resolve the path on connect
    auto_query: Option<AutoDetectQuery>,

    /// Baud rate
    baud_rate: u32,

    /// Connection timeout
    timeout: Duration,

    /// Serial stream (when connected)
    stream: Option<SerialStream>,

    /// Current connection state
    state: ConnectionState,

    /// Accumulator for partial frames
    frames: FrameDecoder,

    /// Interface name for logging
    name: String,
}

impl SerialInterface {
    /// Create a new serial interface
    pub fn new(network: NetworkId, port: impl AsRef<Path>) -> Self {
        let port_path = port.as_ref().to_path_buf();
        let name = format!("serial:{}", port_path.display());

        Self {
            network,
            port_path,
            auto_query: None,
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stream: None,
            state: ConnectionState::Disconnected,
            frames: FrameDecoder::new(FrameFormat::from(network)),
            name,
        }
    }

    /// Create with custom baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Create with custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Re-resolve the device from this query on every connect
    pub fn with_auto_query(mut self, query: AutoDetectQuery) -> Self {
        self.auto_query = Some(query);
        self
    }

    /// Get the port path
    pub fn port_path(&self) -> &Path {
        &self.port_path
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn refresh_port(&mut self) -> Result<()> {
        let Some(query) = &self.auto_query else {
            return Ok(());
        };
        let path = detect::resolve_port(query)?;
        if path != self.port_path {
            warn!(
                network = %self.network,
                old = %self.port_path.display(),
                new = %path.display(),
                "Radio re-enumerated on a different port"
            );
            self.name = format!("serial:{}", path.display());
            self.port_path = path;
        }
        Ok(())
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }
}

#[async_trait]
impl RadioInterface for SerialInterface {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        if let Err(e) = self.refresh_port() {
            self.state = ConnectionState::Disconnected;
            // Still rebooting or unplugged; retryable
            return Err(BridgeError::PortNotFound(e.to_string()));
        }
        info!(network = %self.network, port = %self.port_path.display(), baud = self.baud_rate, "Connecting to serial port");

        if !self.port_path.exists() {
            self.state = ConnectionState::Disconnected;
            return Err(BridgeError::PortNotFound(
                self.port_path.display().to_string(),
            ));
        }

        let stream = tokio_serial::new(self.port_path.to_string_lossy(), self.baud_rate)
            .timeout(self.timeout)
            .open_native_async()
            .map_err(|e| {
                self.state = ConnectionState::Disconnected;
                BridgeError::PortOpenFailed {
                    port: self.port_path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.frames.clear();

        info!(network = %self.network, port = %self.port_path.display(), "Connected to radio");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }

        self.state = ConnectionState::Disconnected;
        self.frames.clear();

        info!(network = %self.network, port = %self.port_path.display(), "Disconnected from serial port");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.stream.is_some()
    }

    async fn read_frame(&mut self) -> Result<Option<InboundFrame>> {
        loop {
            match self.frames.next_frame() {
                Ok(Some(frame)) => return Ok(Some(InboundFrame::Binary(frame))),
                Ok(None) => {}
                Err(e) => {
                    debug!(network = %self.network, error = %e, "Skipping corrupt frame");
                    continue;
                }
            }

            let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;
            let mut buf = [0u8; READ_BUFFER_SIZE];

            match stream.read(&mut buf).await {
                Ok(0) => {
                    // EOF - device unplugged or rebooting
                    self.drop_stream();
                    return Err(BridgeError::Disconnected);
                }
                Ok(n) => {
                    trace!(bytes = n, "Read from serial port");
                    self.frames.extend(&buf[..n]);
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    error!(network = %self.network, error = %e, "Serial read error");
                    self.drop_stream();
                    return Err(BridgeError::ReadError(e.to_string()));
                }
            }
        }
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let frame = self.frames.format().encode(payload)?;
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;

        debug!(size = frame.len(), payload_size = payload.len(), "Writing frame");

        if let Err(e) = stream.write_all(&frame).await {
            error!(network = %self.network, error = %e, "Serial write error");
            self.drop_stream();
            return Err(BridgeError::WriteError(e.to_string()));
        }

        stream
            .flush()
            .await
            .map_err(|e| BridgeError::WriteError(format!("Flush failed: {}", e)))?;

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SerialInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialInterface")
            .field("network", &self.network)
            .field("port", &self.port_path)
            .field("auto", &self.auto_query.as_ref().map(|q| q.to_string()))
            .field("baud_rate", &self.baud_rate)
            .field("state", &self.state)
            .field("buffered", &self.frames.buffered())
            .finish()
    }
}
