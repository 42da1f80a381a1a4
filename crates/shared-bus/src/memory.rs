//! # In-Memory Broker
//!
//! A single-process stand-in for RabbitMQ with the subset of AMQP semantics
//! the provider relies on: durable exchanges that survive link loss, fanout
//! routing, round-robin consumers and requeue of unacknowledged deliveries
//! when a consumer or link goes away.
//!
//! Tests drive failures through [`InMemoryBroker::set_reachable`],
//! [`InMemoryBroker::sever`] and [`InMemoryBroker::cancel_consumers`].

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::errors::TransportError;
use crate::transport::{
    Acknowledger, BrokerLink, BrokerTransport, ConsumerTag, Delivery, DeliveryStream, LinkHealth,
    Topology,
};

/// Exchange routing kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Fanout,
    Direct,
    Topic,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Topic => "topic",
        })
    }
}

struct Exchange {
    kind: ExchangeKind,
    bindings: BTreeSet<String>,
}

struct Message {
    body: Vec<u8>,
    redelivered: bool,
}

struct Subscriber {
    link: u64,
    tag: ConsumerTag,
    tx: mpsc::UnboundedSender<Delivery>,
}

struct Unacked {
    link: u64,
    tag: ConsumerTag,
    body: Vec<u8>,
}

#[derive(Default)]
struct Queue {
    ready: VecDeque<Message>,
    consumers: Vec<Subscriber>,
    next_consumer: usize,
    unacked: HashMap<u64, Unacked>,
}

impl Queue {
    /// Put unacked deliveries matching `pred` back at the head, oldest first.
    fn requeue_where(&mut self, pred: impl Fn(&Unacked) -> bool) {
        let mut tags: Vec<u64> = self
            .unacked
            .iter()
            .filter(|(_, u)| pred(u))
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable_by(|a, b| b.cmp(a));
        for tag in tags {
            if let Some(unacked) = self.unacked.remove(&tag) {
                self.ready.push_front(Message {
                    body: unacked.body,
                    redelivered: true,
                });
            }
        }
    }
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Exchange>,
    queues: HashMap<String, Queue>,
    links: HashMap<u64, watch::Sender<LinkHealth>>,
    next_link: u64,
    next_delivery: u64,
}

struct Shared {
    state: Mutex<BrokerState>,
    reachable: AtomicBool,
}

/// Shared handle to an in-process broker. Clones address the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                reachable: AtomicBool::new(true),
            }),
        }
    }

    /// While unreachable, `open` fails with `Unreachable`.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Drop every open link as if the broker connection was reset.
    /// Topology and queued messages survive.
    pub fn sever(&self) {
        let mut state = self.shared.state.lock();
        let links: Vec<u64> = state.links.keys().copied().collect();
        let severed = links.len();
        for link in links {
            detach_link(&mut state, link);
            if let Some(health) = state.links.remove(&link) {
                health.send_replace(LinkHealth::Failed("connection reset by broker".into()));
            }
        }
        warn!(links = severed, "Broker severed all links");
    }

    /// Cancel every consumer of `queue` from the broker side, as RabbitMQ
    /// does when the queue is deleted. Their streams end, their unacked
    /// deliveries are requeued and the links stay open. Returns how many
    /// consumers were cancelled.
    pub fn cancel_consumers(&self, queue: &str) -> usize {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.queues.get_mut(queue) else {
            return 0;
        };
        let cancelled: Vec<ConsumerTag> = entry.consumers.drain(..).map(|s| s.tag).collect();
        entry.requeue_where(|u| cancelled.contains(&u.tag));
        entry.next_consumer = 0;
        warn!(%queue, consumers = cancelled.len(), "Broker cancelled consumers");
        cancelled.len()
    }

    /// Declare an exchange out of band.
    pub fn declare_exchange(&self, name: &str, kind: ExchangeKind) -> Result<(), TransportError> {
        declare_exchange(&mut self.shared.state.lock(), name, kind)
    }

    /// Messages waiting in `queue` that no consumer holds.
    #[must_use]
    pub fn ready_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.ready.len())
    }

    /// Delivered but not yet settled messages in `queue`.
    #[must_use]
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.unacked.len())
    }

    #[must_use]
    pub fn consumer_count(&self, queue: &str) -> usize {
        self.shared
            .state
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.consumers.len())
    }

    #[must_use]
    pub fn open_links(&self) -> usize {
        self.shared.state.lock().links.len()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn declare_exchange(
    state: &mut BrokerState,
    name: &str,
    kind: ExchangeKind,
) -> Result<(), TransportError> {
    match state.exchanges.get(name) {
        Some(existing) if existing.kind != kind => Err(TransportError::Precondition(format!(
            "inequivalent arg 'type' for exchange '{name}': received '{kind}' but current is '{}'",
            existing.kind
        ))),
        Some(_) => Ok(()),
        None => {
            state.exchanges.insert(
                name.to_string(),
                Exchange {
                    kind,
                    bindings: BTreeSet::new(),
                },
            );
            Ok(())
        }
    }
}

/// Remove a link's consumers and requeue everything it held.
fn detach_link(state: &mut BrokerState, link: u64) {
    for queue in state.queues.values_mut() {
        queue.consumers.retain(|s| s.link != link);
        queue.requeue_where(|u| u.link == link);
    }
}

/// Hand ready messages to consumers round-robin.
fn dispatch(shared: &Arc<Shared>, state: &mut BrokerState, queue_name: &str) {
    let BrokerState {
        queues,
        next_delivery,
        ..
    } = state;
    let Some(queue) = queues.get_mut(queue_name) else {
        return;
    };

    while !queue.consumers.is_empty() {
        let Some(message) = queue.ready.pop_front() else {
            break;
        };
        let index = queue.next_consumer % queue.consumers.len();
        *next_delivery += 1;
        let delivery_tag = *next_delivery;
        let subscriber = &queue.consumers[index];
        let acker = Arc::new(MemoryAcker {
            shared: Arc::clone(shared),
            queue: queue_name.to_string(),
            delivery_tag,
        });
        let delivery = Delivery::new(delivery_tag, message.redelivered, message.body.clone(), acker);

        if subscriber.tx.send(delivery).is_err() {
            debug!(consumer_tag = %subscriber.tag, "Dropping consumer with closed stream");
            queue.consumers.remove(index);
            queue.ready.push_front(message);
            continue;
        }
        queue.unacked.insert(
            delivery_tag,
            Unacked {
                link: subscriber.link,
                tag: subscriber.tag.clone(),
                body: message.body,
            },
        );
        queue.next_consumer = index + 1;
    }
}

#[async_trait]
impl BrokerTransport for InMemoryBroker {
    fn endpoint(&self) -> String {
        "memory://broker".to_string()
    }

    async fn open(&self, topology: &Topology) -> Result<Arc<dyn BrokerLink>, TransportError> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("connection refused".into()));
        }

        let mut state = self.shared.state.lock();
        declare_exchange(&mut state, &topology.exchange, ExchangeKind::Fanout)?;
        state.queues.entry(topology.queue.clone()).or_default();
        if let Some(exchange) = state.exchanges.get_mut(&topology.exchange) {
            exchange.bindings.insert(topology.queue.clone());
        }

        state.next_link += 1;
        let id = state.next_link;
        let (health_tx, health) = watch::channel(LinkHealth::Open);
        state.links.insert(id, health_tx);
        debug!(link = id, exchange = %topology.exchange, queue = %topology.queue, "Link opened");

        Ok(Arc::new(MemoryLink {
            id,
            shared: Arc::clone(&self.shared),
            health,
        }))
    }
}

struct MemoryLink {
    id: u64,
    shared: Arc<Shared>,
    health: watch::Receiver<LinkHealth>,
}

impl MemoryLink {
    fn ensure_open(&self, state: &BrokerState) -> Result<(), TransportError> {
        if state.links.contains_key(&self.id) {
            Ok(())
        } else {
            Err(TransportError::Closed(format!("link {} is closed", self.id)))
        }
    }
}

#[async_trait]
impl BrokerLink for MemoryLink {
    async fn publish(&self, exchange: &str, body: &[u8]) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_open(&state)?;
        let targets: Vec<String> = match state.exchanges.get(exchange) {
            Some(ex) => ex.bindings.iter().cloned().collect(),
            None => {
                return Err(TransportError::Protocol(format!(
                    "no exchange '{exchange}'"
                )))
            }
        };
        if targets.is_empty() {
            warn!(%exchange, "Unroutable message dropped");
            return Ok(());
        }

        for name in targets {
            if let Some(queue) = state.queues.get_mut(&name) {
                queue.ready.push_back(Message {
                    body: body.to_vec(),
                    redelivered: false,
                });
            }
            dispatch(&self.shared, &mut state, &name);
        }
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        tag: &ConsumerTag,
    ) -> Result<DeliveryStream, TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_open(&state)?;
        let entry = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::Protocol(format!("no queue '{queue}'")))?;
        if entry.consumers.iter().any(|s| &s.tag == tag) {
            return Err(TransportError::Protocol(format!(
                "attempt to reuse consumer tag '{tag}'"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        entry.consumers.push(Subscriber {
            link: self.id,
            tag: tag.clone(),
            tx,
        });
        dispatch(&self.shared, &mut state, queue);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn cancel(&self, tag: &ConsumerTag) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        self.ensure_open(&state)?;
        let mut touched = Vec::new();
        for (name, queue) in state.queues.iter_mut() {
            let before = queue.consumers.len();
            queue.consumers.retain(|s| &s.tag != tag);
            if queue.consumers.len() != before {
                queue.requeue_where(|u| &u.tag == tag);
                touched.push(name.clone());
            }
        }
        for name in touched {
            dispatch(&self.shared, &mut state, &name);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        let Some(health) = state.links.remove(&self.id) else {
            return Ok(());
        };
        detach_link(&mut state, self.id);
        health.send_replace(LinkHealth::Closed);
        let names: Vec<String> = state.queues.keys().cloned().collect();
        for name in names {
            dispatch(&self.shared, &mut state, &name);
        }
        debug!(link = self.id, "Link closed");
        Ok(())
    }

    fn health(&self) -> watch::Receiver<LinkHealth> {
        self.health.clone()
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
    queue: String,
    delivery_tag: u64,
}

impl MemoryAcker {
    fn settle(&self, requeue: bool) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        let queue = state
            .queues
            .get_mut(&self.queue)
            .ok_or_else(|| TransportError::Closed(format!("no queue '{}'", self.queue)))?;
        let unacked = queue.unacked.remove(&self.delivery_tag).ok_or_else(|| {
            TransportError::Closed(format!("unknown delivery tag {}", self.delivery_tag))
        })?;
        if requeue {
            queue.ready.push_front(Message {
                body: unacked.body,
                redelivered: true,
            });
            dispatch(&self.shared, &mut state, &self.queue);
        }
        Ok(())
    }
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self) -> Result<(), TransportError> {
        self.settle(false)
    }

    async fn nack(&self, requeue: bool) -> Result<(), TransportError> {
        self.settle(requeue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;

    fn topology() -> Topology {
        Topology::new("events", "queue-service")
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended")
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_every_bound_queue() {
        let broker = InMemoryBroker::new();
        let a = broker.open(&Topology::new("events", "a")).await.unwrap();
        let b = broker.open(&Topology::new("events", "b")).await.unwrap();
        let mut sa = a.consume("a", &ConsumerTag::new("ta")).await.unwrap();
        let mut sb = b.consume("b", &ConsumerTag::new("tb")).await.unwrap();

        a.publish("events", b"hello").await.unwrap();

        assert_eq!(next(&mut sa).await.body, b"hello");
        assert_eq!(next(&mut sb).await.body, b"hello");
    }

    #[tokio::test]
    async fn test_round_robin_between_consumers() {
        let broker = InMemoryBroker::new();
        let link = broker.open(&topology()).await.unwrap();
        let mut first = link.consume("queue-service", &ConsumerTag::new("1")).await.unwrap();
        let mut second = link.consume("queue-service", &ConsumerTag::new("2")).await.unwrap();

        for body in [&b"m1"[..], b"m2", b"m3"] {
            link.publish("events", body).await.unwrap();
        }

        assert_eq!(next(&mut first).await.body, b"m1");
        assert_eq!(next(&mut second).await.body, b"m2");
        assert_eq!(next(&mut first).await.body, b"m3");
    }

    #[tokio::test]
    async fn test_messages_wait_for_a_consumer() {
        let broker = InMemoryBroker::new();
        let link = broker.open(&topology()).await.unwrap();
        link.publish("events", b"early").await.unwrap();
        assert_eq!(broker.ready_count("queue-service"), 1);

        let mut stream = link.consume("queue-service", &ConsumerTag::new("t")).await.unwrap();
        let delivery = next(&mut stream).await;
        assert_eq!(delivery.body, b"early");
        assert_eq!(broker.unacked_count("queue-service"), 1);

        delivery.acker().ack().await.unwrap();
        assert_eq!(broker.unacked_count("queue-service"), 0);
        assert!(delivery.acker().ack().await.is_err());
    }

    #[tokio::test]
    async fn test_nack_requeue_redelivers() {
        let broker = InMemoryBroker::new();
        let link = broker.open(&topology()).await.unwrap();
        let mut stream = link.consume("queue-service", &ConsumerTag::new("t")).await.unwrap();
        link.publish("events", b"retry").await.unwrap();

        let first = next(&mut stream).await;
        assert!(!first.redelivered);
        first.acker().nack(true).await.unwrap();

        let second = next(&mut stream).await;
        assert!(second.redelivered);
        assert_eq!(second.body, b"retry");
    }

    #[tokio::test]
    async fn test_exchange_kind_mismatch_is_precondition() {
        let broker = InMemoryBroker::new();
        broker.declare_exchange("events", ExchangeKind::Direct).unwrap();

        let err = broker.open(&topology()).await.err().unwrap();
        assert!(matches!(err, TransportError::Precondition(_)));
        assert!(err.to_string().contains("inequivalent arg 'type'"));
    }

    #[tokio::test]
    async fn test_unreachable_broker_refuses() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);
        assert!(matches!(
            broker.open(&topology()).await.err().unwrap(),
            TransportError::Unreachable(_)
        ));
        broker.set_reachable(true);
        assert!(broker.open(&topology()).await.is_ok());
    }

    #[tokio::test]
    async fn test_sever_fails_links_and_requeues() {
        let broker = InMemoryBroker::new();
        let link = broker.open(&topology()).await.unwrap();
        let mut health = link.health();
        let mut stream = link.consume("queue-service", &ConsumerTag::new("t")).await.unwrap();
        link.publish("events", b"inflight").await.unwrap();
        let held = next(&mut stream).await;

        broker.sever();

        assert!(matches!(*health.borrow_and_update(), LinkHealth::Failed(_)));
        assert_eq!(broker.open_links(), 0);
        assert_eq!(broker.consumer_count("queue-service"), 0);
        assert_eq!(broker.ready_count("queue-service"), 1);
        assert!(held.acker().ack().await.is_err());
        assert!(matches!(
            link.publish("events", b"late").await,
            Err(TransportError::Closed(_))
        ));
        assert!(timeout(Duration::from_millis(100), stream.next())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_broker_cancel_ends_stream_but_keeps_link() {
        let broker = InMemoryBroker::new();
        let link = broker.open(&topology()).await.unwrap();
        let health = link.health();
        let mut stream = link.consume("queue-service", &ConsumerTag::new("t")).await.unwrap();
        link.publish("events", b"held").await.unwrap();
        let _held = next(&mut stream).await;

        assert_eq!(broker.cancel_consumers("queue-service"), 1);
        assert_eq!(broker.cancel_consumers("missing"), 0);

        assert!(timeout(Duration::from_millis(100), stream.next())
            .await
            .unwrap()
            .is_none());
        assert_eq!(*health.borrow(), LinkHealth::Open);
        assert_eq!(broker.open_links(), 1);
        assert_eq!(broker.consumer_count("queue-service"), 0);
        assert_eq!(broker.ready_count("queue-service"), 1);
        assert_eq!(broker.unacked_count("queue-service"), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let broker = InMemoryBroker::new();
        let link = broker.open(&topology()).await.unwrap();
        link.close().await.unwrap();
        link.close().await.unwrap();
        assert_eq!(*link.health().borrow(), LinkHealth::Closed);
        assert_eq!(broker.open_links(), 0);
    }
}
