//! Error types for the contact storage layer

use meshbridge_core::CoreError;
use thiserror::Error;

/// Errors that can occur in contact storage
#[derive(Error, Debug)]
pub enum StateError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema setup failed
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored row could not be turned back into a contact
    #[error("Invalid data in column {column}: {reason}")]
    InvalidData { column: &'static str, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StateError::Connection(err.to_string())
            }
            sqlx::Error::Database(db_err) => StateError::Database(db_err.to_string()),
            _ => StateError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

impl From<StateError> for CoreError {
    fn from(err: StateError) -> Self {
        CoreError::Storage(err.to_string())
    }
}

/// Result type for state operations
pub type Result<T> = std::result::Result<T, StateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_core_error() {
        let core: CoreError = StateError::Database("disk I/O error".into()).into();
        assert!(core.is_storage_error());
        assert!(core.to_string().contains("disk I/O error"));
    }

    #[test]
    fn test_pool_errors_are_connection_errors() {
        let err: StateError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StateError::Connection(_)));
    }
}
