//! # Broker Errors

use thiserror::Error;

/// Failures reported by a [`BrokerTransport`](crate::BrokerTransport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker could not be reached or refused the connection.
    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    /// A declaration conflicts with existing topology.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// The connection or channel is gone.
    #[error("Link closed: {0}")]
    Closed(String),

    /// Any other protocol level failure.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Errors returned by [`QueueProvider`](crate::QueueProvider).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueProviderError {
    /// Connecting or declaring topology failed.
    #[error("Unable to connect to broker: {source}")]
    UnableToConnect {
        #[source]
        source: TransportError,
    },

    /// The operation needs a live connection; call `connect()` first.
    #[error("Not connected to broker")]
    NotConnected,

    /// An operation on a live connection failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl QueueProviderError {
    /// Whether retrying later could succeed. `NotConnected` is caller misuse.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueProviderError::UnableToConnect { .. } => true,
            QueueProviderError::NotConnected => false,
            QueueProviderError::Transport(e) => {
                matches!(e, TransportError::Unreachable(_) | TransportError::Closed(_))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let connect = QueueProviderError::UnableToConnect {
            source: TransportError::Unreachable("connection refused".into()),
        };
        assert!(connect.is_retryable());
        assert!(!QueueProviderError::NotConnected.is_retryable());
        assert!(!QueueProviderError::from(TransportError::Protocol("bad frame".into())).is_retryable());
    }

    #[test]
    fn test_unable_to_connect_message() {
        let err = QueueProviderError::UnableToConnect {
            source: TransportError::Precondition("inequivalent arg 'type'".into()),
        };
        assert_eq!(
            err.to_string(),
            "Unable to connect to broker: Precondition failed: inequivalent arg 'type'"
        );
    }
}
