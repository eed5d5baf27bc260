//! Error types for bridge operations
//!
//! Every error is classified as retryable (drives the connection health
//! state machine), fatal (configuration problems, only raised at startup) or
//! unknown.

use meshbridge_core::{NetworkId, SendFailure};
use std::io;
use thiserror::Error;

/// How the health manager should treat an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient network/transport trouble; reconnect
    Retryable,
    /// Misconfiguration; abort startup
    Fatal,
    /// Anything else
    Unknown,
}

/// Main error type for bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    // ===== Transport Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Port or socket open failed
    #[error("Failed to open {port}: {reason}")]
    PortOpenFailed {
        /// Port path or host:port
        port: String,
        /// Failure reason
        reason: String,
    },

    /// Read error
    #[error("Read error: {0}")]
    ReadError(String),

    /// Write error
    #[error("Write error: {0}")]
    WriteError(String),

    /// Peer closed the connection
    #[error("Transport disconnected")]
    Disconnected,

    /// Operation attempted on a closed handle
    #[error("Transport not connected")]
    NotConnected,

    /// Our own deadline expired
    #[error("Connection timeout after {duration_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// OS-level timeout
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// Remote host unreachable
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    /// Remote refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// Local network unreachable
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    // ===== Configuration Errors =====
    /// Auto-detection matched no device, or several without a way to choose
    #[error("Device not found for {query}: {reason}")]
    DeviceNotFound {
        /// The auto-detect query as configured
        query: String,
        /// What went wrong, including candidates when ambiguous
        reason: String,
    },

    /// Two networks configured for the same physical resource
    #[error("Transport conflict: {first} and {second} are both configured for {resource}")]
    PortConflict {
        /// Device path or host:port
        resource: String,
        /// First network claiming it
        first: NetworkId,
        /// Second network claiming it
        second: NetworkId,
    },

    /// The same network configured twice
    #[error("Network {0} is configured more than once")]
    DuplicateNetwork(NetworkId),

    /// Transport specifier could not be parsed
    #[error("Invalid transport specifier {spec:?}: {reason}")]
    InvalidTransport {
        /// The specifier
        spec: String,
        /// Why it was rejected
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== Protocol Errors =====
    /// Frame could not be delimited or parsed
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Declared frame length is implausible
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Outbound text does not fit a radio packet
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge {
        /// Actual size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Protobuf decode error
    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(String),

    /// Protobuf encode error
    #[error("Protobuf encode error: {0}")]
    ProtobufEncode(String),

    // ===== Recovery Errors =====
    /// Another reconnect already owns this handle
    #[error("Reconnect already in progress")]
    ReconnectInProgress,

    /// Remote recovery cannot be attempted
    #[error("Remote recovery unavailable: {0}")]
    RecoveryUnavailable(String),

    // ===== Routing Errors =====
    /// Reply could not be routed
    #[error("Send failed: {0}")]
    Send(#[from] SendFailure),

    // ===== General Errors =====
    /// Contact store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal channel closed
    #[error("Channel closed")]
    ChannelClosed,

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error not covered by a more specific variant
    #[error("IO error: {0}")]
    Io(io::Error),
}

impl BridgeError {
    /// Classify for the health state machine
    pub fn class(&self) -> ErrorClass {
        match self {
            BridgeError::PortNotFound(_)
            | BridgeError::PortOpenFailed { .. }
            | BridgeError::ReadError(_)
            | BridgeError::WriteError(_)
            | BridgeError::Disconnected
            | BridgeError::NotConnected
            | BridgeError::ConnectionTimeout { .. }
            | BridgeError::TimedOut(_)
            | BridgeError::HostUnreachable(_)
            | BridgeError::ConnectionRefused(_)
            | BridgeError::NetworkUnreachable(_) => ErrorClass::Retryable,

            BridgeError::DeviceNotFound { .. }
            | BridgeError::PortConflict { .. }
            | BridgeError::DuplicateNetwork(_)
            | BridgeError::InvalidTransport { .. }
            | BridgeError::InvalidConfig(_) => ErrorClass::Fatal,

            BridgeError::Io(err) if is_retryable_io_kind(err.kind()) => ErrorClass::Retryable,

            _ => ErrorClass::Unknown,
        }
    }

    /// Check if this error is recoverable by reconnecting
    pub fn is_retriable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// Check if this error must abort startup
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Check if this is a protocol error (bad data from the device)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            BridgeError::InvalidFrame(_)
                | BridgeError::FrameTooLarge { .. }
                | BridgeError::ProtobufDecode(_)
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::PortNotFound(_) => "PORT_NOT_FOUND",
            BridgeError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            BridgeError::ReadError(_) => "READ_ERROR",
            BridgeError::WriteError(_) => "WRITE_ERROR",
            BridgeError::Disconnected => "DISCONNECTED",
            BridgeError::NotConnected => "NOT_CONNECTED",
            BridgeError::ConnectionTimeout { .. } => "CONNECTION_TIMEOUT",
            BridgeError::TimedOut(_) => "TIMED_OUT",
            BridgeError::HostUnreachable(_) => "HOST_UNREACHABLE",
            BridgeError::ConnectionRefused(_) => "CONNECTION_REFUSED",
            BridgeError::NetworkUnreachable(_) => "NETWORK_UNREACHABLE",
            BridgeError::DeviceNotFound { .. } => "DEVICE_NOT_FOUND",
            BridgeError::PortConflict { .. } => "PORT_CONFLICT",
            BridgeError::DuplicateNetwork(_) => "DUPLICATE_NETWORK",
            BridgeError::InvalidTransport { .. } => "INVALID_TRANSPORT",
            BridgeError::InvalidConfig(_) => "INVALID_CONFIG",
            BridgeError::InvalidFrame(_) => "INVALID_FRAME",
            BridgeError::FrameTooLarge { .. } => "FRAME_TOO_LARGE",
            BridgeError::MessageTooLarge { .. } => "MESSAGE_TOO_LARGE",
            BridgeError::ProtobufDecode(_) => "PROTOBUF_DECODE",
            BridgeError::ProtobufEncode(_) => "PROTOBUF_ENCODE",
            BridgeError::ReconnectInProgress => "RECONNECT_IN_PROGRESS",
            BridgeError::RecoveryUnavailable(_) => "RECOVERY_UNAVAILABLE",
            BridgeError::Send(_) => "SEND_FAILED",
            BridgeError::Storage(_) => "STORAGE",
            BridgeError::ChannelClosed => "CHANNEL_CLOSED",
            BridgeError::ChannelError(_) => "CHANNEL_ERROR",
            BridgeError::Internal(_) => "INTERNAL_ERROR",
            BridgeError::Io(_) => "IO_ERROR",
        }
    }
}

fn is_retryable_io_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::AddrNotAvailable
    )
}

impl From<io::Error> for BridgeError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => BridgeError::ConnectionRefused(err.to_string()),
            io::ErrorKind::TimedOut => BridgeError::TimedOut(err.to_string()),
            _ => {
                // "No route to host" / "Network is unreachable" have no stable ErrorKind on
                // older toolchains; match the OS message instead.
                let text = err.to_string().to_ascii_lowercase();
                if text.contains("no route to host") || text.contains("host is unreachable") {
                    BridgeError::HostUnreachable(err.to_string())
                } else if text.contains("network is unreachable") {
                    BridgeError::NetworkUnreachable(err.to_string())
                } else {
                    BridgeError::Io(err)
                }
            }
        }
    }
}

impl From<prost::DecodeError> for BridgeError {
    fn from(err: prost::DecodeError) -> Self {
        BridgeError::ProtobufDecode(err.to_string())
    }
}

impl From<prost::EncodeError> for BridgeError {
    fn from(err: prost::EncodeError) -> Self {
        BridgeError::ProtobufEncode(err.to_string())
    }
}

impl From<meshbridge_core::CoreError> for BridgeError {
    fn from(err: meshbridge_core::CoreError) -> Self {
        match err {
            meshbridge_core::CoreError::Storage(msg) => BridgeError::Storage(msg),
            other => BridgeError::Internal(other.to_string()),
        }
    }
}

impl From<meshbridge_state::StateError> for BridgeError {
    fn from(err: meshbridge_state::StateError) -> Self {
        BridgeError::Storage(err.to_string())
    }
}

// Conversion from serialport error (only when serial feature is enabled)
#[cfg(feature = "serial")]
impl From<serialport::Error> for BridgeError {
    fn from(err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => BridgeError::PortNotFound(err.description),
            serialport::ErrorKind::Io(kind) => io::Error::new(kind, err.description).into(),
            _ => BridgeError::PortOpenFailed {
                port: String::new(),
                reason: err.description,
            },
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BridgeError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BridgeError::ChannelError(err.to_string())
    }
}

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
