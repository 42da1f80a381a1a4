//! Service lifecycle: prepare the store, connect, consume, shut down.

use std::sync::Arc;

use parking_lot::Mutex;
use qs_01_transaction_store::{SessionManager, StorageEngine, StoreError, MULTISIG_TRANSACTION};
use shared_bus::{ConsumerTag, QueueProvider, QueueProviderError};
use thiserror::Error;
use tracing::{info, warn};

use crate::handlers::EventsService;

/// Startup failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Failed to prepare the store: {0}")]
    Store(#[from] StoreError),

    #[error("Broker error: {0}")]
    Broker(#[from] QueueProviderError),
}

/// The running queue service.
pub struct QueueRuntime {
    provider: QueueProvider,
    manager: SessionManager,
    consumer: Mutex<Option<ConsumerTag>>,
}

impl QueueRuntime {
    pub fn new(provider: QueueProvider, engine: Arc<dyn StorageEngine>) -> Self {
        Self {
            provider,
            manager: SessionManager::new(engine),
            consumer: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn provider(&self) -> &QueueProvider {
        &self.provider
    }

    #[must_use]
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Consumer tag of the events handler once started.
    #[must_use]
    pub fn consumer_tag(&self) -> Option<ConsumerTag> {
        self.consumer.lock().clone()
    }

    /// Start the service.
    ///
    /// ## Startup Sequence
    ///
    /// 1. Create the transaction table if missing
    /// 2. Connect to the broker and declare the topology
    /// 3. Register the events handler
    pub async fn start(&self) -> Result<ConsumerTag, RuntimeError> {
        if let Some(tag) = self.consumer_tag() {
            return Ok(tag);
        }

        let engine = self.manager.engine();
        engine.migrate(&MULTISIG_TRANSACTION).await?;
        info!(engine = engine.name(), table = MULTISIG_TRANSACTION.name, "Store ready");

        self.provider.connect().await?;
        let tag = self
            .provider
            .consume(EventsService::with_default_store(self.manager.clone()))
            .await?;
        info!(
            consumer_tag = %tag,
            queue = %self.provider.config().topology.queue,
            "Consuming events"
        );
        *self.consumer.lock() = Some(tag.clone());
        Ok(tag)
    }

    /// Stop consuming and close the broker connection.
    ///
    /// Handlers already running are awaited, up to the connector's drain
    /// timeout, before the connection closes; their scopes release their
    /// sessions as they complete.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        let tag = self.consumer.lock().take();
        if let Some(tag) = tag {
            if let Err(e) = self.provider.cancel(&tag).await {
                warn!(consumer_tag = %tag, error = %e, "Failed to cancel consumer");
            }
        }
        self.provider.disconnect().await;

        let active = self.manager.active_scopes();
        if active > 0 {
            warn!(active_scopes = active, "Shutting down with scopes still active");
        }
        info!("Shutdown complete");
    }
}
