//! # Safe Queue Service
//!
//! Consumes Safe transaction events from RabbitMQ and stores them in
//! PostgreSQL.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (env file, then environment)
//! 2. Install structured logging
//! 3. Open the database engine
//! 4. Create the table, connect to the broker, start consuming
//! 5. Wait for Ctrl+C, drain running handlers, close the broker link and
//!    the database pool

use std::sync::Arc;

use anyhow::{Context, Result};
use qs_01_transaction_store::PostgresEngine;
use queue_runtime::{QueueRuntime, ServiceConfig};
use queue_telemetry::{init_logging, TelemetryConfig};
use shared_bus::{AmqpTransport, QueueProvider};
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // The env file must be loaded before the log levels are read.
    let config = ServiceConfig::from_env().context("Invalid service configuration")?;
    let telemetry = TelemetryConfig::from_env().context("Invalid logging configuration")?;
    init_logging(&telemetry).context("Failed to initialize logging")?;

    info!("===========================================");
    info!("  Safe Queue Service v{}", env!("CARGO_PKG_VERSION"));
    info!("===========================================");
    info!(
        exchange = %config.broker.exchange,
        queue = %config.broker.queue,
        pool = ?config.database.pool,
        test = config.test,
        "Configuration loaded"
    );

    let engine = Arc::new(
        PostgresEngine::new(&config.postgres_config()).context("Failed to create database engine")?,
    );
    let transport = AmqpTransport::new(config.broker.amqp_url.clone());
    let provider = QueueProvider::new(transport, config.queue_config());

    let runtime = QueueRuntime::new(provider, engine.clone());
    runtime.start().await.context("Failed to start queue service")?;

    info!("Queue service running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    runtime.shutdown().await;
    engine.shutdown().await;
    info!("Database pool closed");
    Ok(())
}
