//! # Events Service
//!
//! Turns event messages from the queue into multisig transaction rows.
//!
//! ## Flow
//!
//! 1. The broker connector hands over one UTF-8 message
//! 2. The message is decoded into a [`QueueEvent`] (no session needed)
//! 3. Storable events run inside a fresh session scope
//! 4. The scope is released on every exit path
//!
//! Decoding failures and data errors are logged and dropped: redelivering
//! the same bytes cannot succeed. Only transient storage failures are
//! reported back to the connector.

use std::sync::Arc;

use async_trait::async_trait;
use qs_01_transaction_store::{
    MultisigTransactionApi, MultisigTransactionService, ScopeContext, SessionManager, StoreError,
};
use queue_telemetry::{session_span, task_span};
use shared_bus::{HandlerError, MessageHandler};
use shared_types::{to_hex, CodecError, Hash};
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::payload::QueueEvent;

/// Task name attached to every log line of one processed message.
pub const PROCESS_EVENT_TASK: &str = "process_event";

/// Why an event could not be applied.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Malformed event: {0}")]
    Malformed(String),

    #[error("Invalid field {field}: {source}")]
    Codec {
        field: &'static str,
        source: CodecError,
    },

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EventError {
    /// Whether processing the same message again could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventError::Store(e) if e.is_retryable())
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Created { safe_tx_hash: Hash },
    Executed { safe_tx_hash: Hash, failed: bool },
    Ignored { event_type: String },
}

/// Message handler that persists transaction events.
pub struct EventsService<A = MultisigTransactionService> {
    manager: SessionManager,
    store: Arc<A>,
}

impl<A> Clone for EventsService<A> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            store: Arc::clone(&self.store),
        }
    }
}

impl EventsService<MultisigTransactionService> {
    /// Events service over the default store.
    #[must_use]
    pub fn with_default_store(manager: SessionManager) -> Self {
        Self::new(manager, Arc::new(MultisigTransactionService::new()))
    }
}

impl<A: MultisigTransactionApi> EventsService<A> {
    pub fn new(manager: SessionManager, store: Arc<A>) -> Self {
        Self { manager, store }
    }

    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Decode `message` and apply it in its own session scope.
    pub async fn process_event(&self, message: &str) -> Result<EventOutcome, EventError> {
        let event: QueueEvent = message.parse()?;
        if let QueueEvent::Other(event_type) = event {
            debug!(%event_type, "Ignoring event");
            return Ok(EventOutcome::Ignored { event_type });
        }

        self.manager
            .run_in_scope(|scope| {
                let span = session_span(scope.id().as_str());
                async move {
                    let result = self.apply(&scope, event).await;
                    if let Err(e) = &result {
                        error!(error = %e, retryable = e.is_retryable(), "Failed to apply event");
                    }
                    result
                }
                .instrument(span)
            })
            .await
    }

    async fn apply(&self, scope: &ScopeContext, event: QueueEvent) -> Result<EventOutcome, EventError> {
        match event {
            QueueEvent::Proposed(tx) => {
                let stored = self.store.create(scope, *tx).await?;
                Ok(EventOutcome::Created {
                    safe_tx_hash: stored.safe_tx_hash,
                })
            }
            QueueEvent::Executed {
                safe_tx_hash,
                tx_hash,
                failed,
            } => {
                self.store
                    .mark_executed(scope, &safe_tx_hash, tx_hash, failed)
                    .await?;
                Ok(EventOutcome::Executed {
                    safe_tx_hash,
                    failed,
                })
            }
            QueueEvent::Other(event_type) => Ok(EventOutcome::Ignored { event_type }),
        }
    }
}

#[async_trait]
impl<A: MultisigTransactionApi + 'static> MessageHandler for EventsService<A> {
    async fn handle(&self, message: String) -> Result<(), HandlerError> {
        let task_id = Uuid::new_v4().to_string();
        let span = task_span(PROCESS_EVENT_TASK, &task_id);

        async move {
            match self.process_event(&message).await {
                Ok(EventOutcome::Created { safe_tx_hash }) => {
                    info!(safe_tx_hash = %to_hex(&safe_tx_hash), "Proposed transaction stored");
                    Ok(())
                }
                Ok(EventOutcome::Executed {
                    safe_tx_hash,
                    failed,
                }) => {
                    info!(safe_tx_hash = %to_hex(&safe_tx_hash), failed, "Execution recorded");
                    Ok(())
                }
                Ok(EventOutcome::Ignored { .. }) => Ok(()),
                Err(e) if e.is_retryable() => Err(Box::new(e) as HandlerError),
                Err(e @ (EventError::Malformed(_)
                | EventError::Codec { .. }
                | EventError::InvalidField { .. })) => {
                    warn!(error = %e, "Dropping undecodable event");
                    Ok(())
                }
                // Already logged inside the session scope.
                Err(EventError::Store(_)) => Ok(()),
            }
        }
        .instrument(span)
        .await
    }
}
