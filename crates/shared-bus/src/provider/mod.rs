//! # Queue Provider
//!
//! A robust connector to one fanout exchange and one durable queue.
//!
//! ```text
//!   connect()                    link or stream lost
//! Disconnected ──▶ Connecting ──▶ Connected ──────────▶ Connecting (recovery)
//!      ▲              │ error        │ disconnect()        │ attempts exhausted
//!      └──────────────┴──────────────┴─────────────────────┘
//! ```
//!
//! ## Recovery
//!
//! A supervisor task watches the live link and every consumer's delivery
//! stream. When the transport reports an unexpected failure, or a stream
//! ends without the provider cancelling it (broker-side cancel, channel
//! closed), it reopens the link with exponential backoff, redeclares the
//! topology and re-registers every consumer under the tag the caller
//! already holds. The connection lock is released between attempts, so
//! `connect()` and `consume()` fail fast while the broker is away.
//!
//! ## Acknowledgement
//!
//! [`AckMode::BeforeHandle`] (the default) acks each delivery before its
//! handler runs, so a crash mid-handler loses the message (at-most-once).
//! [`AckMode::AfterHandle`] acks only after the handler succeeds and
//! requeues on failure (at-least-once).
//!
//! ## Shutdown
//!
//! Handler tasks are tracked. `disconnect()` stops the pumps, then waits up
//! to [`QueueConfig::drain_timeout`] for running handlers before closing
//! the link.


use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::errors::{QueueProviderError, TransportError};
use crate::handler::MessageHandler;
use crate::transport::{
    BrokerLink, BrokerTransport, ConsumerTag, Delivery, DeliveryStream, LinkHealth, Topology,
};

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// When a delivery is acknowledged relative to its handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    #[default]
    BeforeHandle,
    AfterHandle,
}

/// Backoff applied between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryPolicy {
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl RecoveryPolicy {
    /// Delay to wait after the `attempt`-th failure (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt >= max)
    }
}

/// Connector settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub topology: Topology,
    pub ack_mode: AckMode,
    pub recovery: RecoveryPolicy,
    /// Bound on a single connect attempt.
    pub connect_timeout: Option<Duration>,
    /// How long `disconnect()` waits for running handlers.
    pub drain_timeout: Duration,
}

impl QueueConfig {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            topology: Topology::new(exchange, queue),
            ack_mode: AckMode::default(),
            recovery: RecoveryPolicy::default(),
            connect_timeout: Some(Duration::from_secs(30)),
            drain_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    #[must_use]
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    #[must_use]
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }
}

struct Consumer {
    handler: Arc<dyn MessageHandler>,
    pump: JoinHandle<()>,
}

/// A delivery stream that ended while its link was still current.
#[derive(Debug, Clone)]
struct StreamLost {
    generation: u64,
    tag: ConsumerTag,
}

struct Inner {
    transport: Arc<dyn BrokerTransport>,
    config: QueueConfig,
    state_tx: watch::Sender<ConnectionState>,
    link: parking_lot::Mutex<Option<Arc<dyn BrokerLink>>>,
    /// Bumped every time a new link is installed.
    generation: AtomicU64,
    stream_lost: watch::Sender<Option<StreamLost>>,
    supervisor: parking_lot::Mutex<Option<JoinHandle<()>>>,
    handlers: parking_lot::Mutex<JoinSet<()>>,
    /// Also serializes connect, disconnect, consume, cancel and each
    /// recovery step.
    consumers: AsyncMutex<HashMap<ConsumerTag, Consumer>>,
}

/// Connector handle. Clones share the same connection.
#[derive(Clone)]
pub struct QueueProvider {
    inner: Arc<Inner>,
}

impl QueueProvider {
    pub fn new<T: BrokerTransport>(transport: T, config: QueueConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    pub fn with_shared_transport(transport: Arc<dyn BrokerTransport>, config: QueueConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (stream_lost, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                state_tx,
                link: parking_lot::Mutex::new(None),
                generation: AtomicU64::new(0),
                stream_lost,
                supervisor: parking_lot::Mutex::new(None),
                handlers: parking_lot::Mutex::new(JoinSet::new()),
                consumers: AsyncMutex::new(HashMap::new()),
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Connect and declare the topology. No-op when already connected.
    ///
    /// ## Errors
    ///
    /// - `UnableToConnect`: the broker is unreachable, a declaration was
    ///   rejected, or a recovery is already reconnecting; the provider
    ///   keeps its current state
    pub async fn connect(&self) -> Result<(), QueueProviderError> {
        let _consumers = self.inner.consumers.lock().await;
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Connecting => {
                return Err(QueueProviderError::UnableToConnect {
                    source: TransportError::Unreachable("link recovery in progress".into()),
                })
            }
            ConnectionState::Disconnected => {}
        }

        let endpoint = self.inner.transport.endpoint();
        info!(%endpoint, "Connecting to broker");
        self.inner.set_state(ConnectionState::Connecting);
        let link = match self.inner.open_link().await {
            Ok(link) => link,
            Err(e) => {
                self.inner.set_state(ConnectionState::Disconnected);
                warn!(%endpoint, error = %e, "Unable to connect to broker");
                return Err(QueueProviderError::UnableToConnect { source: e });
            }
        };

        let health = link.health();
        self.inner.install(link);
        let supervisor = tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            health,
            self.inner.stream_lost.subscribe(),
        ));
        if let Some(previous) = self.inner.supervisor.lock().replace(supervisor) {
            previous.abort();
        }
        self.inner.set_state(ConnectionState::Connected);
        let topology = &self.inner.config.topology;
        info!(
            %endpoint,
            exchange = %topology.exchange,
            queue = %topology.queue,
            "Connected to broker"
        );
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state transition.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Number of handler tasks still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let mut handlers = self.inner.handlers.lock();
        while let Some(joined) = handlers.try_join_next() {
            report_join(joined);
        }
        handlers.len()
    }

    /// Stop consuming, wait for running handlers and close the connection.
    /// Idempotent.
    pub async fn disconnect(&self) {
        let supervisor = self.inner.supervisor.lock().take();
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        let mut consumers = self.inner.consumers.lock().await;
        for (_, consumer) in consumers.drain() {
            consumer.pump.abort();
        }
        // AfterHandle settles on the link, so it stays open until handlers end.
        self.inner.drain_handlers().await;

        let link = self.inner.link.lock().take();
        if let Some(link) = link {
            if let Err(e) = link.close().await {
                warn!(error = %e, "Error while closing broker link");
            }
        }
        if self.state() != ConnectionState::Disconnected {
            self.inner.set_state(ConnectionState::Disconnected);
            info!("Disconnected from broker");
        }
    }

    /// Start consuming the declared queue with `handler`.
    ///
    /// ## Errors
    ///
    /// - `NotConnected`: `connect()` has not succeeded yet, or a recovery
    ///   is in progress
    /// - `Transport`: the broker refused the subscription
    pub async fn consume<H: MessageHandler>(
        &self,
        handler: H,
    ) -> Result<ConsumerTag, QueueProviderError> {
        let handler: Arc<dyn MessageHandler> = Arc::new(handler);
        let mut consumers = self.inner.consumers.lock().await;
        let link = self.inner.live_link()?;

        let tag = ConsumerTag::generate();
        let stream = link
            .consume(&self.inner.config.topology.queue, &tag)
            .await?;
        let pump = self.inner.spawn_pump(tag.clone(), Arc::clone(&handler), stream);
        consumers.insert(tag.clone(), Consumer { handler, pump });
        info!(
            consumer_tag = %tag,
            queue = %self.inner.config.topology.queue,
            "Consuming queue"
        );
        Ok(tag)
    }

    /// Cancel one subscription. Returns whether `tag` was registered.
    pub async fn cancel(&self, tag: &ConsumerTag) -> Result<bool, QueueProviderError> {
        let mut consumers = self.inner.consumers.lock().await;
        let Some(consumer) = consumers.remove(tag) else {
            return Ok(false);
        };
        consumer.pump.abort();
        let link = self.inner.link.lock().clone();
        if let Some(link) = link {
            link.cancel(tag).await?;
        }
        debug!(consumer_tag = %tag, "Consumer cancelled");
        Ok(true)
    }

    /// Publish a text message to the declared exchange.
    pub async fn publish(&self, body: &str) -> Result<(), QueueProviderError> {
        let link = self.inner.live_link()?;
        link.publish(&self.inner.config.topology.exchange, body.as_bytes())
            .await?;
        Ok(())
    }
}

impl fmt::Debug for QueueProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProvider")
            .field("endpoint", &self.inner.transport.endpoint())
            .field("topology", &self.inner.config.topology)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn install(&self, link: Arc<dyn BrokerLink>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.link.lock() = Some(link);
    }

    fn live_link(&self) -> Result<Arc<dyn BrokerLink>, QueueProviderError> {
        if *self.state_tx.borrow() != ConnectionState::Connected {
            return Err(QueueProviderError::NotConnected);
        }
        self.link
            .lock()
            .clone()
            .ok_or(QueueProviderError::NotConnected)
    }

    async fn open_link(&self) -> Result<Arc<dyn BrokerLink>, TransportError> {
        let open = self.transport.open(&self.config.topology);
        match self.config.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, open).await.map_err(|_| {
                TransportError::Unreachable(format!("connect timed out after {limit:?}"))
            })?,
            None => open.await,
        }
    }

    /// Reason to recover if `lost` reports a stream of the current link.
    fn live_stream_loss(&self, lost: &mut watch::Receiver<Option<StreamLost>>) -> Option<String> {
        let current = self.generation.load(Ordering::SeqCst);
        let seen = lost.borrow_and_update();
        seen.as_ref()
            .filter(|loss| loss.generation == current)
            .map(|loss| format!("delivery stream of consumer {} ended", loss.tag))
    }

    fn spawn_pump(
        self: &Arc<Self>,
        tag: ConsumerTag,
        handler: Arc<dyn MessageHandler>,
        mut stream: DeliveryStream,
    ) -> JoinHandle<()> {
        let provider = Arc::downgrade(self);
        let generation = self.generation.load(Ordering::SeqCst);
        tokio::spawn(async move {
            while let Some(delivery) = stream.next().await {
                let Some(inner) = provider.upgrade() else {
                    return;
                };
                inner.dispatch(&tag, &handler, delivery).await;
            }
            // Cancel, disconnect and recovery abort the pump before its
            // stream ends, so reaching here means the broker dropped it.
            warn!(consumer_tag = %tag, "Delivery stream ended unexpectedly");
            if let Some(inner) = provider.upgrade() {
                inner
                    .stream_lost
                    .send_replace(Some(StreamLost { generation, tag }));
            }
        })
    }

    fn spawn_handler<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handlers = self.handlers.lock();
        while let Some(joined) = handlers.try_join_next() {
            report_join(joined);
        }
        handlers.spawn(task);
    }

    async fn drain_handlers(&self) {
        let mut handlers = std::mem::take(&mut *self.handlers.lock());
        if handlers.is_empty() {
            return;
        }

        let limit = self.config.drain_timeout;
        info!(in_flight = handlers.len(), "Waiting for running handlers");
        let drained = tokio::time::timeout(limit, async {
            while let Some(joined) = handlers.join_next().await {
                report_join(joined);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                abandoned = handlers.len(),
                ?limit,
                "Handlers still running after drain timeout, aborting"
            );
            handlers.abort_all();
        }
    }

    /// Reopen the link and re-register consumers. Returns the health watch
    /// of the new link, or `None` once the policy gives up.
    async fn recover(self: &Arc<Self>, reason: &str) -> Option<watch::Receiver<LinkHealth>> {
        {
            let consumers = self.consumers.lock().await;
            warn!(%reason, "Broker link lost, recovering");
            for consumer in consumers.values() {
                consumer.pump.abort();
            }
            self.set_state(ConnectionState::Connecting);
        }
        let stale = self.link.lock().take();
        if let Some(stale) = stale {
            if let Err(e) = stale.close().await {
                debug!(error = %e, "Stale link did not close cleanly");
            }
        }

        let policy = &self.config.recovery;
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match self.open_link().await {
                Ok(link) => {
                    // Installed before locking so a concurrent disconnect closes it.
                    self.install(Arc::clone(&link));
                    let mut consumers = self.consumers.lock().await;
                    match self.resubscribe(&link, &mut consumers).await {
                        Ok(()) => {
                            let health = link.health();
                            self.set_state(ConnectionState::Connected);
                            info!(attempt, consumers = consumers.len(), "Broker link recovered");
                            return Some(health);
                        }
                        Err(e) => {
                            warn!(attempt, error = %e, "Re-registering consumers failed");
                            self.link.lock().take();
                            if let Err(e) = link.close().await {
                                debug!(error = %e, "Partial link did not close cleanly");
                            }
                        }
                    }
                }
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }

            if policy.exhausted(attempt) {
                let mut consumers = self.consumers.lock().await;
                for (_, consumer) in consumers.drain() {
                    consumer.pump.abort();
                }
                self.set_state(ConnectionState::Disconnected);
                error!(attempt, "Giving up on broker recovery");
                return None;
            }
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    async fn resubscribe(
        self: &Arc<Self>,
        link: &Arc<dyn BrokerLink>,
        consumers: &mut HashMap<ConsumerTag, Consumer>,
    ) -> Result<(), TransportError> {
        for (tag, consumer) in consumers.iter_mut() {
            let stream = link.consume(&self.config.topology.queue, tag).await?;
            consumer.pump.abort();
            consumer.pump = self.spawn_pump(tag.clone(), Arc::clone(&consumer.handler), stream);
        }
        Ok(())
    }

    async fn dispatch(&self, tag: &ConsumerTag, handler: &Arc<dyn MessageHandler>, delivery: Delivery) {
        let acker = delivery.acker();
        let delivery_tag = delivery.delivery_tag;

        if delivery.body.is_empty() {
            if let Err(e) = acker.ack().await {
                warn!(consumer_tag = %tag, delivery_tag, error = %e, "Ack failed");
            }
            return;
        }
        let message = match String::from_utf8(delivery.body) {
            Ok(message) => message,
            Err(e) => {
                error!(consumer_tag = %tag, delivery_tag, error = %e, "Rejecting non UTF-8 message");
                if let Err(e) = acker.nack(false).await {
                    warn!(consumer_tag = %tag, delivery_tag, error = %e, "Reject failed");
                }
                return;
            }
        };

        let handler = Arc::clone(handler);
        let tag = tag.clone();
        match self.config.ack_mode {
            AckMode::BeforeHandle => {
                if let Err(e) = acker.ack().await {
                    // Unacked deliveries come back after the link recovers.
                    warn!(consumer_tag = %tag, delivery_tag, error = %e, "Ack failed, skipping");
                    return;
                }
                self.spawn_handler(async move {
                    if let Err(e) = handler.handle(message).await {
                        error!(consumer_tag = %tag, delivery_tag, error = %e, "Message handler failed");
                    }
                });
            }
            AckMode::AfterHandle => {
                self.spawn_handler(async move {
                    let settled = match handler.handle(message).await {
                        Ok(()) => acker.ack().await,
                        Err(e) => {
                            error!(consumer_tag = %tag, delivery_tag, error = %e, "Message handler failed, requeueing");
                            acker.nack(true).await
                        }
                    };
                    if let Err(e) = settled {
                        warn!(consumer_tag = %tag, delivery_tag, error = %e, "Settling delivery failed");
                    }
                });
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.abort();
        }
        for consumer in self.consumers.get_mut().values() {
            consumer.pump.abort();
        }
    }
}

fn report_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Message handler panicked");
        }
    }
}

async fn supervise(
    inner: Weak<Inner>,
    mut health: watch::Receiver<LinkHealth>,
    mut lost: watch::Receiver<Option<StreamLost>>,
) {
    loop {
        let reason = loop {
            let current = health.borrow_and_update().clone();
            match current {
                LinkHealth::Failed(reason) => break reason,
                LinkHealth::Closed => return,
                LinkHealth::Open => {}
            }
            tokio::select! {
                changed = health.changed() => {
                    if changed.is_err() {
                        break "link dropped by transport".to_string();
                    }
                }
                changed = lost.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    if let Some(reason) = inner.live_stream_loss(&mut lost) {
                        break reason;
                    }
                }
            }
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };
        match inner.recover(&reason).await {
            Some(next) => health = next,
            None => return,
        }
    }
}
