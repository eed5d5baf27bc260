//! TCP interface for networked radios
//!
//! Meshtastic nodes with WiFi/Ethernet expose their stream API on port 4403;
//! MeshCore companion firmware with WiFi listens on port 5000. Both use the
//! same framing over TCP as over serial.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace};

use meshbridge_core::NetworkId;

use super::framing::{FrameDecoder, FrameFormat};
use super::{ConnectionState, InboundFrame, RadioInterface};
use crate::config::DEFAULT_TIMEOUT_MS;
use crate::error::{BridgeError, Result};

/// Buffer size for reading from the socket
const READ_BUFFER_SIZE: usize = 1024;

/// TCP interface for connecting to radios over the network
pub struct TcpInterface {
    network: NetworkId,
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
    state: ConnectionState,
    frames: FrameDecoder,
    name: String,
}

impl TcpInterface {
    /// Create a new TCP interface
    pub fn new(network: NetworkId, host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let name = format!("tcp:{}:{}", host, port);
        Self {
            network,
            host,
            port,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stream: None,
            state: ConnectionState::Disconnected,
            frames: FrameDecoder::new(FrameFormat::from(network)),
            name,
        }
    }

    /// Create with custom connect timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn drop_stream(&mut self) {
        self.stream = None;
        self.state = ConnectionState::Disconnected;
    }
}

#[async_trait]
impl RadioInterface for TcpInterface {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        info!(network = %self.network, host = %self.host, port = self.port, "Connecting to radio");

        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.state = ConnectionState::Disconnected;
                return Err(e.into());
            }
            Err(_) => {
                self.state = ConnectionState::Disconnected;
                return Err(BridgeError::ConnectionTimeout {
                    duration_ms: self.timeout.as_millis() as u64,
                });
            }
        };
        stream.set_nodelay(true)?;

        self.stream = Some(stream);
        self.state = ConnectionState::Connected;
        self.frames.clear();

        info!(network = %self.network, endpoint = %self.name, "Connected to radio");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.state = ConnectionState::Disconnected;
        self.frames.clear();

        info!(network = %self.network, endpoint = %self.name, "Disconnected from radio");
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
                    self.drop_stream();
                    return Err(BridgeError::Disconnected);
                }
                Ok(n) => {
                    trace!(bytes = n, "Read from socket");
                    self.frames.extend(&buf[..n]);
                }
                Err(e) => {
                    error!(network = %self.network, error = %e, "Socket read error");
                    self.drop_stream();
                    return Err(e.into());
                }
            }
        }
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let frame = self.frames.format().encode(payload)?;
        let stream = self.stream.as_mut().ok_or(BridgeError::NotConnected)?;

        debug!(size = frame.len(), payload_size = payload.len(), "Writing frame");
        if let Err(e) = stream.write_all(&frame).await {
            error!(network = %self.network, error = %e, "Socket write error");
            self.drop_stream();
            return Err(e.into());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TcpInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpInterface")
            .field("network", &self.network)
            .field("endpoint", &self.name)
            .field("state", &self.state)
            .field("buffered", &self.frames.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reads_frames_from_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            // Split across two writes to exercise buffering
            sock.write_all(&[b'>', 0x02, 0x00]).await.unwrap();
            sock.write_all(&[0x0a, 0x0b]).await.unwrap();

            let mut got = [0u8; 4];
            sock.read_exact(&mut got).await.unwrap();
            got
        });

        let mut iface = TcpInterface::new(NetworkId::MeshCore, "127.0.0.1", port);
        iface.connect().await.unwrap();
        assert!(iface.is_connected());

        match iface.read_frame().await.unwrap() {
            Some(InboundFrame::Binary(frame)) => assert_eq!(frame.as_ref(), &[0x0a, 0x0b]),
            other => panic!("unexpected frame: {other:?}"),
        }

        iface.write_frame(&[0x0a]).await.unwrap();
        assert_eq!(server.await.unwrap(), [b'<', 0x01, 0x00, 0x0a]);
    }

    #[tokio::test]
    async fn test_peer_close_is_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut iface = TcpInterface::new(NetworkId::Meshtastic, "127.0.0.1", port);
        iface.connect().await.unwrap();
        let err = iface.read_frame().await.unwrap_err();
        assert!(err.is_retriable());
        assert!(!iface.is_connected());
    }

    #[tokio::test]
    async fn test_write_without_connect() {
        let mut iface = TcpInterface::new(NetworkId::Meshtastic, "127.0.0.1", 4403);
        assert!(matches!(
            iface.write_frame(b"x").await,
            Err(BridgeError::NotConnected)
        ));
    }
}
