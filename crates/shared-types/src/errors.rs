//! # Error Types
//!
//! Errors raised at the storage and wire boundary when a value violates a
//! domain invariant. None of them are retryable: retrying cannot fix bad data.

use thiserror::Error;

/// Errors produced by the domain codecs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Integral value outside the representable domain.
    #[error("{codec}: value {value} is out of range")]
    Range { codec: &'static str, value: String },

    /// Input is not of a type the codec accepts.
    #[error("{codec}: expected {expected}, got {found}")]
    Type {
        codec: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    /// Text input could not be decoded as hex.
    #[error("{codec}: invalid hex input: {reason}")]
    Format { codec: &'static str, reason: String },

    /// Byte input has the wrong width.
    #[error("{codec}: expected {expected} bytes, got {actual}")]
    Length {
        codec: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl CodecError {
    /// Name of the codec that rejected the value.
    #[must_use]
    pub fn codec(&self) -> &'static str {
        match self {
            CodecError::Range { codec, .. }
            | CodecError::Type { codec, .. }
            | CodecError::Format { codec, .. }
            | CodecError::Length { codec, .. } => codec,
        }
    }
}
