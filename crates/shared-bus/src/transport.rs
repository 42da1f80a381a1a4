//! # Broker Transport Port
//!
//! The seam between [`QueueProvider`](crate::QueueProvider) and a concrete
//! broker. A transport opens a [`BrokerLink`] (connection plus channel with
//! the topology declared); the link publishes, consumes and reports its own
//! health so the provider can supervise it.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::errors::TransportError;

/// Names of the objects declared on every (re)connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Durable fanout exchange.
    pub exchange: String,
    /// Durable queue bound to `exchange` with an empty routing key.
    pub queue: String,
}

impl Topology {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
        }
    }
}

/// Identifier of one subscription, stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerTag(String);

impl ConsumerTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(format!("ctag-{}", Uuid::new_v4()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Health of an open link as seen by its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkHealth {
    Open,
    /// Lost without being asked to close.
    Failed(String),
    /// Closed on request.
    Closed,
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), TransportError>;

    /// Negative acknowledgement; `requeue = false` discards the message.
    async fn nack(&self, requeue: bool) -> Result<(), TransportError>;
}

/// One message handed out by a consumer.
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub body: Vec<u8>,
    acker: Arc<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        redelivered: bool,
        body: Vec<u8>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            redelivered,
            body,
            acker,
        }
    }

    /// A handle that settles this delivery, detached from the body.
    #[must_use]
    pub fn acker(&self) -> Arc<dyn Acknowledger> {
        Arc::clone(&self.acker)
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("redelivered", &self.redelivered)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Deliveries of one consumer, in broker order. Ends when the consumer is
/// cancelled or the link goes away.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Delivery> + Send>>;

/// An open connection and channel with the topology declared.
#[async_trait]
pub trait BrokerLink: Send + Sync {
    async fn publish(&self, exchange: &str, body: &[u8]) -> Result<(), TransportError>;

    async fn consume(&self, queue: &str, tag: &ConsumerTag)
        -> Result<DeliveryStream, TransportError>;

    async fn cancel(&self, tag: &ConsumerTag) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    /// Watch that flips to `Failed` when the link is lost unexpectedly.
    fn health(&self) -> watch::Receiver<LinkHealth>;
}

/// Factory for links to one broker.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    /// Broker address for logs, without credentials.
    fn endpoint(&self) -> String;

    /// Connect, open a channel and declare `topology`, idempotently.
    ///
    /// ## Errors
    ///
    /// - `Unreachable`: the broker refused or could not be reached
    /// - `Precondition`: an existing object has different properties
    async fn open(&self, topology: &Topology) -> Result<Arc<dyn BrokerLink>, TransportError>;
}
