//! # Shared Bus - Robust Broker Connector
//!
//! Connects the queue service to its event feed: one durable fanout
//! exchange, one durable queue bound to it, and any number of consumers
//! running a [`MessageHandler`] per text message.
//!
//! ```text
//! ┌──────────────┐  publish   ┌──────────┐  fanout  ┌───────────────┐
//! │  Producers   │ ─────────▶ │ Exchange │ ───────▶ │ Durable queue │
//! └──────────────┘            └──────────┘          └───────┬───────┘
//!                                                           │ consume
//!                                                  ┌────────▼────────┐
//!                                                  │  QueueProvider  │
//!                                                  │  (supervised)   │
//!                                                  └────────┬────────┘
//!                                                           │ spawn per message
//!                                                     MessageHandler
//! ```
//!
//! ## Transports
//!
//! - [`AmqpTransport`]: RabbitMQ through `lapin` (feature `amqp`)
//! - [`InMemoryBroker`]: in-process broker with failure injection for tests

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod errors;
pub mod handler;
pub mod memory;
pub mod provider;
pub mod transport;

#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;
pub use errors::{QueueProviderError, TransportError};
pub use handler::{handler_fn, FnHandler, HandlerError, MessageHandler};
pub use memory::{ExchangeKind, InMemoryBroker};
pub use provider::{AckMode, ConnectionState, QueueConfig, QueueProvider, RecoveryPolicy};
pub use transport::{
    Acknowledger, BrokerLink, BrokerTransport, ConsumerTag, Delivery, DeliveryStream, LinkHealth,
    Topology,
};
