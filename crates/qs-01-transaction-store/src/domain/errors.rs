//! # Domain Errors
//!
//! Error types for the transaction store.
//!
//! Codec and scope-usage errors propagate unmodified; only the outermost
//! handler decides whether a failure is logged or surfaced.

use shared_types::CodecError;
use thiserror::Error;

/// Errors that can occur during store and session operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A row with this primary key already exists.
    #[error("Row already exists in {table}: {key}")]
    Conflict { table: &'static str, key: String },

    /// No row with this primary key exists.
    #[error("Row not found in {table}: {key}")]
    NotFound { table: &'static str, key: String },

    /// The session was resolved outside an active scope.
    #[error("No active session scope: {scope}")]
    NoActiveScope { scope: String },

    /// A scope with this id is already bound.
    #[error("Session scope already active: {scope}")]
    ScopeAlreadyActive { scope: String },

    /// The session was used after `close()`.
    #[error("Session {session} is closed")]
    SessionClosed { session: String },

    /// A value violated a column codec.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// The storage engine failed.
    #[error("Database error: {message}")]
    Database { message: String },

    /// Rows or tables do not match the declared schema.
    #[error("Schema error: {message}")]
    Schema { message: String },
}

impl StoreError {
    pub fn database(message: impl Into<String>) -> Self {
        StoreError::Database {
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        StoreError::Schema {
            message: message.into(),
        }
    }

    /// Whether retrying the unit of work could succeed.
    ///
    /// Only engine failures are transient; codec, conflict and scope errors
    /// describe the request itself.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_converts() {
        let err: StoreError = CodecError::Length {
            codec: "hash",
            expected: 32,
            actual: 3,
        }
        .into();
        assert_eq!(err.to_string(), "Codec error: hash: expected 32 bytes, got 3");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_database_errors_are_retryable() {
        assert!(StoreError::database("connection reset").is_retryable());
        assert!(!StoreError::schema("missing column").is_retryable());
    }
}
