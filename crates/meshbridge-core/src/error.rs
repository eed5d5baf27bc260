//! Error types shared by the bridge crates
//!
//! Transport and routing errors live in `meshbridge-radio`; this enum covers
//! identifier parsing and the contact-store boundary.

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    // ===== Identifier Errors =====
    /// Node id could not be parsed
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    /// Public key prefix is not lowercase-able hex or is too short
    #[error("Invalid public key prefix {prefix:?}: {reason}")]
    InvalidKeyPrefix { prefix: String, reason: String },

    /// Unknown network name
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    // ===== Storage Errors =====
    /// Contact store failure
    #[error("Contact store error: {0}")]
    Storage(String),

    // ===== General Errors =====
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Check if this error came from the storage backend
    pub fn is_storage_error(&self) -> bool {
        matches!(self, CoreError::Storage(_))
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidNodeId(_) => "INVALID_NODE_ID",
            CoreError::InvalidKeyPrefix { .. } => "INVALID_KEY_PREFIX",
            CoreError::UnknownNetwork(_) => "UNKNOWN_NETWORK",
            CoreError::Storage(_) => "STORAGE",
            CoreError::Internal(_) => "INTERNAL",
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
