//! # AMQP Transport
//!
//! RabbitMQ adapter over `lapin`. One connection and one channel per link.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tracing::{debug, error};

use crate::errors::TransportError;
use crate::transport::{
    Acknowledger, BrokerLink, BrokerTransport, ConsumerTag, Delivery, DeliveryStream, LinkHealth,
    Topology,
};

const REPLY_SUCCESS: u16 = 200;

/// Transport for an `amqp://` URL.
#[derive(Clone)]
pub struct AmqpTransport {
    url: String,
}

impl AmqpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl std::fmt::Debug for AmqpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpTransport")
            .field("endpoint", &self.endpoint())
            .finish()
    }
}

/// `url` with any `user:password@` removed.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}{}", &url[..scheme_end + 3], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}

fn protocol(e: lapin::Error) -> TransportError {
    TransportError::Protocol(e.to_string())
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    fn endpoint(&self) -> String {
        redact(&self.url)
    }

    async fn open(&self, topology: &Topology) -> Result<Arc<dyn BrokerLink>, TransportError> {
        let connection = Connection::connect(&self.url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        let (health_tx, health) = watch::channel(LinkHealth::Open);
        let health_tx = Arc::new(health_tx);
        let on_error = Arc::clone(&health_tx);
        connection.on_error(move |e| {
            error!(error = %e, "AMQP connection error");
            on_error.send_replace(LinkHealth::Failed(e.to_string()));
        });

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))?;
        channel
            .exchange_declare(
                &topology.exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Precondition(e.to_string()))?;
        channel
            .queue_declare(
                &topology.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Precondition(e.to_string()))?;
        channel
            .queue_bind(
                &topology.queue,
                &topology.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(protocol)?;
        debug!(exchange = %topology.exchange, queue = %topology.queue, "AMQP topology declared");

        Ok(Arc::new(AmqpLink {
            connection,
            channel,
            health_tx,
            health,
        }))
    }
}

struct AmqpLink {
    connection: Connection,
    channel: Channel,
    health_tx: Arc<watch::Sender<LinkHealth>>,
    health: watch::Receiver<LinkHealth>,
}

#[async_trait]
impl BrokerLink for AmqpLink {
    async fn publish(&self, exchange: &str, body: &[u8]) -> Result<(), TransportError> {
        self.channel
            .basic_publish(
                exchange,
                "",
                BasicPublishOptions::default(),
                body,
                BasicProperties::default(),
            )
            .await
            .map_err(protocol)?
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        tag: &ConsumerTag,
    ) -> Result<DeliveryStream, TransportError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                tag.as_str(),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(protocol)?;

        let tag = tag.clone();
        let stream = consumer.map_while(move |item| match item {
            Ok(delivery) => Some(Delivery::new(
                delivery.delivery_tag,
                delivery.redelivered,
                delivery.data,
                Arc::new(AmqpAcker {
                    acker: delivery.acker,
                }),
            )),
            Err(e) => {
                error!(consumer_tag = %tag, error = %e, "AMQP consumer failed");
                None
            }
        });
        Ok(Box::pin(stream))
    }

    async fn cancel(&self, tag: &ConsumerTag) -> Result<(), TransportError> {
        self.channel
            .basic_cancel(tag.as_str(), BasicCancelOptions::default())
            .await
            .map_err(protocol)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.health_tx.send_replace(LinkHealth::Closed);
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(|e| TransportError::Closed(e.to_string()))
    }

    fn health(&self) -> watch::Receiver<LinkHealth> {
        self.health.clone()
    }
}

struct AmqpAcker {
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(protocol)
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.acker
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map_err(protocol)
    }
}
