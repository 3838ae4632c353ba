//! Broker trait definitions
//!
//! The connector never talks to a client library directly. It dials a
//! [`Broker`], opens channels on the returned [`BrokerConnection`] and
//! performs all topology and messaging work through [`BrokerChannel`].

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::BrokerResult;

/// Content type attached to every outbound message
pub const CONTENT_TYPE_JSON: &str = "text/json";

/// AMQP delivery mode for non-persistent messages
pub const DELIVERY_MODE_TRANSIENT: u8 = 1;

/// Stream of deliveries produced by a registered consumer
///
/// The stream ends when the consumer is cancelled or its connection closes.
pub type DeliveryStream = BoxStream<'static, BrokerResult<Delivery>>;

/// Outbound message with its AMQP properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publishing {
    pub body: Vec<u8>,
    pub content_type: String,
    pub delivery_mode: u8,
    pub priority: u8,
}

impl Publishing {
    /// Non-persistent JSON message with priority 0
    pub fn transient_json(body: Vec<u8>) -> Self {
        Self {
            body,
            content_type: CONTENT_TYPE_JSON.to_string(),
            delivery_mode: DELIVERY_MODE_TRANSIENT,
            priority: 0,
        }
    }
}

/// Acknowledges exactly one delivery
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> BrokerResult<()>;
}

/// A single message received from a queue
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Box<dyn Acknowledge>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: Box<dyn Acknowledge>) -> Self {
        Self { body, acker }
    }

    /// Acknowledge this delivery (single message, never batched)
    pub async fn ack(&self) -> BrokerResult<()> {
        self.acker.ack().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("body", &String::from_utf8_lossy(&self.body))
            .finish_non_exhaustive()
    }
}

/// Entry point of a broker backend
#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a new, independent connection to `address`
    async fn dial(&self, address: &str) -> BrokerResult<Box<dyn BrokerConnection>>;
}

/// A live connection to the broker
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Open a channel on this connection
    async fn channel(&self) -> BrokerResult<Box<dyn BrokerChannel>>;

    /// Close the connection and every channel opened on it
    async fn close(&self) -> BrokerResult<()>;
}

/// A channel on a broker connection
///
/// Implementations must be safe to share between tasks, but callers that
/// need ordering guarantees should still funnel writes through one task.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a non-durable fanout exchange
    async fn declare_fanout_exchange(&self, name: &str) -> BrokerResult<()>;

    /// Declare a non-durable exclusive queue and return its name
    async fn declare_exclusive_queue(&self, name: &str) -> BrokerResult<String>;

    /// Bind `queue` to `exchange` with the given routing key
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
    -> BrokerResult<()>;

    /// Register a manual-acknowledgement consumer on `queue`
    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream>;

    /// Publish to the default exchange, routed by queue name
    async fn publish(&self, queue: &str, message: Publishing) -> BrokerResult<()>;

    /// Close the channel
    async fn close(&self) -> BrokerResult<()>;
}
