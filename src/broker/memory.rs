//! In-process broker backend (no network)
//!
//! This backend models the small slice of AMQP 0-9-1 the connector relies on:
//! - Named fanout exchanges and the queues bound to them
//! - Exclusive queues owned by a connection and dropped when it closes
//! - The default exchange, routing by queue name
//! - Manual acknowledgement
//! - Channel-level errors: a failed bind closes the channel and cancels
//!   every consumer registered on it, as RabbitMQ does
//!
//! It is used by the test-suite and is handy for embedding the connector
//! without a running RabbitMQ. Every operation can be made to fail on demand
//! through [`MemoryBroker::fail`] and [`MemoryBroker::fail_after`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::trace;

use super::backend::{
    Acknowledge, Broker, BrokerChannel, BrokerConnection, Delivery, DeliveryStream, Publishing,
};
use super::error::{BrokerError, BrokerResult};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    Dial,
    Channel,
    DeclareExchange,
    DeclareQueue,
    Bind,
    Consume,
    Publish,
    Ack,
    Close,
}

type ConsumerSender = mpsc::UnboundedSender<BrokerResult<Delivery>>;

struct Consumer {
    /// Channel the consumer was registered on
    channel: u64,
    sender: ConsumerSender,
}

#[derive(Default)]
struct Queue {
    /// Connection that declared the queue exclusively
    owner: Option<u64>,
    pending: VecDeque<Vec<u8>>,
    consumer: Option<Consumer>,
}

#[derive(Default)]
struct State {
    next_connection: u64,
    next_channel: u64,
    open_connections: usize,
    dials: usize,
    acked: usize,
    generated_queues: u64,
    /// Exchange name to bound queue names
    exchanges: HashMap<String, Vec<String>>,
    queues: HashMap<String, Queue>,
    /// Messages published through the default exchange, by routing key
    published: HashMap<String, Vec<Publishing>>,
    /// Remaining successful calls before an operation starts failing
    failures: HashMap<FailurePoint, usize>,
}

impl State {
    fn should_fail(&mut self, point: FailurePoint) -> bool {
        match self.failures.get_mut(&point) {
            Some(0) => true,
            Some(remaining) => {
                *remaining -= 1;
                false
            }
            None => false,
        }
    }

    fn enqueue(&mut self, shared: &Arc<Mutex<State>>, queue_name: &str, body: Vec<u8>) -> bool {
        let Some(queue) = self.queues.get_mut(queue_name) else {
            return false;
        };

        let delivered = match &queue.consumer {
            Some(consumer) => {
                let delivery = Delivery::new(body.clone(), Box::new(MemoryAcker::new(shared)));
                consumer.sender.send(Ok(delivery)).is_ok()
            }
            None => false,
        };

        if !delivered {
            queue.consumer = None;
            queue.pending.push_back(body);
        }
        true
    }

    /// Drop every consumer registered on `channel`, ending its stream
    fn cancel_consumers(&mut self, channel: u64) {
        for (name, queue) in self.queues.iter_mut() {
            if queue
                .consumer
                .as_ref()
                .is_some_and(|consumer| consumer.channel == channel)
            {
                trace!(queue = %name, channel, "cancelling consumer");
                queue.consumer = None;
            }
        }
    }

    fn drop_connection(&mut self, id: u64) {
        let owned: Vec<String> = self
            .queues
            .iter()
            .filter(|(_, queue)| queue.owner == Some(id))
            .map(|(name, _)| name.clone())
            .collect();

        for name in owned {
            trace!(queue = %name, "dropping exclusive queue");
            self.queues.remove(&name);
            for bound in self.exchanges.values_mut() {
                bound.retain(|queue| queue != &name);
            }
        }
        self.open_connections = self.open_connections.saturating_sub(1);
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process broker shared by every connection dialed from it
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a fanout exchange from the server side (e.g. a subscription topic)
    pub fn declare_exchange(&self, name: &str) {
        lock(&self.state).exchanges.entry(name.to_string()).or_default();
    }

    /// Publish `body` to every queue bound to `exchange`
    ///
    /// Returns the number of queues the message was routed to.
    pub fn publish_to_exchange(&self, exchange: &str, body: impl Into<Vec<u8>>) -> usize {
        let body = body.into();
        let mut state = lock(&self.state);
        let Some(bound) = state.exchanges.get(exchange).cloned() else {
            return 0;
        };

        bound
            .iter()
            .filter(|queue| state.enqueue(&self.state, queue, body.clone()))
            .count()
    }

    /// Messages published to the default exchange with `queue` as routing key
    pub fn published(&self, queue: &str) -> Vec<Publishing> {
        lock(&self.state)
            .published
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Poll until at least `count` messages were published to `queue`
    ///
    /// Returns whatever was published when the timeout expires.
    pub async fn wait_for_published(
        &self,
        queue: &str,
        count: usize,
        timeout: Duration,
    ) -> Vec<Publishing> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let published = self.published(queue);
            if published.len() >= count || tokio::time::Instant::now() >= deadline {
                return published;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Queues currently bound to `exchange`
    pub fn bindings(&self, exchange: &str) -> Vec<String> {
        lock(&self.state)
            .exchanges
            .get(exchange)
            .cloned()
            .unwrap_or_default()
    }

    pub fn exchange_exists(&self, name: &str) -> bool {
        lock(&self.state).exchanges.contains_key(name)
    }

    /// Names of every live queue, sorted
    pub fn queues(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).queues.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        lock(&self.state).queues.contains_key(name)
    }

    /// Number of deliveries acknowledged so far
    pub fn acked(&self) -> usize {
        lock(&self.state).acked
    }

    /// Number of successful dials so far
    pub fn dials(&self) -> usize {
        lock(&self.state).dials
    }

    pub fn open_connections(&self) -> usize {
        lock(&self.state).open_connections
    }

    /// Make every future call of `point` fail
    pub fn fail(&self, point: FailurePoint) {
        self.fail_after(point, 0);
    }

    /// Let `successes` calls of `point` succeed, then fail every later one
    pub fn fail_after(&self, point: FailurePoint, successes: usize) {
        lock(&self.state).failures.insert(point, successes);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn dial(&self, address: &str) -> BrokerResult<Box<dyn BrokerConnection>> {
        let mut state = lock(&self.state);
        if state.should_fail(FailurePoint::Dial) {
            return Err(BrokerError::ConnectionFailed(format!(
                "connection refused: {address}"
            )));
        }

        state.next_connection += 1;
        state.open_connections += 1;
        state.dials += 1;
        trace!(connection = state.next_connection, "dialed memory broker");

        Ok(Box::new(MemoryConnection {
            id: state.next_connection,
            state: self.state.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct MemoryConnection {
    id: u64,
    state: Arc<Mutex<State>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn channel(&self) -> BrokerResult<Box<dyn BrokerChannel>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelFailed("connection is closed".to_string()));
        }
        let mut state = lock(&self.state);
        if state.should_fail(FailurePoint::Channel) {
            return Err(BrokerError::ChannelFailed("channel limit reached".to_string()));
        }
        state.next_channel += 1;

        Ok(Box::new(MemoryChannel {
            id: state.next_channel,
            connection: self.id,
            state: self.state.clone(),
            connection_closed: self.closed.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::CloseFailed("connection already closed".to_string()));
        }

        let mut state = lock(&self.state);
        state.drop_connection(self.id);
        if state.should_fail(FailurePoint::Close) {
            return Err(BrokerError::CloseFailed("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

struct MemoryChannel {
    id: u64,
    connection: u64,
    state: Arc<Mutex<State>>,
    connection_closed: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> BrokerResult<MutexGuard<'_, State>> {
        if self.closed.load(Ordering::SeqCst) || self.connection_closed.load(Ordering::SeqCst) {
            return Err(BrokerError::ChannelFailed("channel is closed".to_string()));
        }
        Ok(lock(&self.state))
    }

    /// Close the channel after a channel-level exception
    fn fail_channel(&self, state: &mut State, error: BrokerError) -> BrokerError {
        self.closed.store(true, Ordering::SeqCst);
        state.cancel_consumers(self.id);
        error
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_fanout_exchange(&self, name: &str) -> BrokerResult<()> {
        let mut state = self.ensure_open()?;
        if state.should_fail(FailurePoint::DeclareExchange) {
            return Err(BrokerError::DeclarationFailed(format!(
                "access refused to exchange '{name}'"
            )));
        }
        state.exchanges.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn declare_exclusive_queue(&self, name: &str) -> BrokerResult<String> {
        let mut state = self.ensure_open()?;
        if state.should_fail(FailurePoint::DeclareQueue) {
            return Err(BrokerError::DeclarationFailed(format!(
                "access refused to queue '{name}'"
            )));
        }

        let name = if name.is_empty() {
            state.generated_queues += 1;
            format!("amq.gen-{}", state.generated_queues)
        } else {
            name.to_string()
        };

        if let Some(existing) = state.queues.get(&name)
            && existing.owner != Some(self.connection)
        {
            return Err(BrokerError::DeclarationFailed(format!(
                "queue '{name}' is locked by another connection"
            )));
        }

        state.queues.entry(name.clone()).or_insert_with(|| Queue {
            owner: Some(self.connection),
            ..Default::default()
        });
        Ok(name)
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        _routing_key: &str,
    ) -> BrokerResult<()> {
        let mut state = self.ensure_open()?;
        if state.should_fail(FailurePoint::Bind) {
            let error = BrokerError::BindFailed(format!("access refused binding to '{exchange}'"));
            return Err(self.fail_channel(&mut state, error));
        }
        if !state.queues.contains_key(queue) {
            let error = BrokerError::BindFailed(format!("no queue '{queue}'"));
            return Err(self.fail_channel(&mut state, error));
        }
        if !state.exchanges.contains_key(exchange) {
            let error = BrokerError::BindFailed(format!("no exchange '{exchange}'"));
            return Err(self.fail_channel(&mut state, error));
        }

        let bound = state.exchanges.entry(exchange.to_string()).or_default();
        if !bound.iter().any(|name| name == queue) {
            bound.push(queue.to_string());
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        let mut state = self.ensure_open()?;
        if state.should_fail(FailurePoint::Consume) {
            return Err(BrokerError::ConsumeFailed(format!(
                "consumer '{consumer_tag}' rejected"
            )));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let Some(entry) = state.queues.get_mut(queue) else {
            return Err(BrokerError::ConsumeFailed(format!("no queue '{queue}'")));
        };
        if entry.consumer.is_some() {
            return Err(BrokerError::ConsumeFailed(format!(
                "queue '{queue}' already has a consumer"
            )));
        }

        for body in entry.pending.drain(..) {
            let delivery = Delivery::new(body, Box::new(MemoryAcker::new(&self.state)));
            let _ = tx.send(Ok(delivery));
        }
        entry.consumer = Some(Consumer {
            channel: self.id,
            sender: tx,
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, queue: &str, message: Publishing) -> BrokerResult<()> {
        let mut state = self.ensure_open()?;
        if state.should_fail(FailurePoint::Publish) {
            return Err(BrokerError::PublishFailed(format!(
                "channel flow stopped for '{queue}'"
            )));
        }

        let body = message.body.clone();
        state
            .published
            .entry(queue.to_string())
            .or_default()
            .push(message);
        state.enqueue(&self.state, queue, body);
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::CloseFailed("channel already closed".to_string()));
        }

        let mut state = lock(&self.state);
        state.cancel_consumers(self.id);
        if state.should_fail(FailurePoint::Close) {
            return Err(BrokerError::CloseFailed("channel close timed out".to_string()));
        }
        Ok(())
    }
}

struct MemoryAcker {
    state: Arc<Mutex<State>>,
    done: AtomicBool,
}

impl MemoryAcker {
    fn new(state: &Arc<Mutex<State>>) -> Self {
        Self {
            state: state.clone(),
            done: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> BrokerResult<()> {
        let mut state = lock(&self.state);
        if state.should_fail(FailurePoint::Ack) {
            return Err(BrokerError::AckFailed("unknown delivery tag".to_string()));
        }
        if self.done.swap(true, Ordering::SeqCst) {
            return Err(BrokerError::AckFailed("delivery already acknowledged".to_string()));
        }
        state.acked += 1;
        Ok(())
    }
}
