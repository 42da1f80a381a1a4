//! # Safe Queue Service Runtime
//!
//! Wires the broker connector to the multisig transaction store.
//!
//! ```text
//! RabbitMQ ──fanout──→ queue ──→ QueueProvider ──message──→ EventsService
//!                                                              │ run_in_scope
//!                                                              ↓
//!                                            MultisigTransactionService ──→ Postgres
//! ```
//!
//! ## Modules
//!
//! - `config` - Environment configuration (`ENV_FILE`, database, broker)
//! - `handlers` - Event decoding and the events handler
//! - `runtime` - Startup and graceful shutdown

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod handlers;
pub mod runtime;

pub use config::{BrokerConfig, ConfigError, DatabaseConfig, ServiceConfig};
pub use handlers::{EventError, EventOutcome, EventsService, QueueEvent};
pub use runtime::{QueueRuntime, RuntimeError};
