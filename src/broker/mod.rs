//! Broker backends for the connector
//!
//! ## Design
//!
//! - **Trait-based**: `Broker`, `BrokerConnection` and `BrokerChannel` hide the client library
//! - **Async**: every operation is async for use from Tokio tasks
//! - **Two backends**: `lapin` for real AMQP brokers, an in-process broker for tests
//!
//! ## Usage
//!
//! ```no_run
//! use sensu_bridge::broker::{Broker, amqp::AmqpBroker};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let connection = AmqpBroker::new().dial("amqp://guest@localhost//").await?;
//!     connection.close().await?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod backend;
pub mod error;
pub mod memory;

pub use backend::{
    Acknowledge, Broker, BrokerChannel, BrokerConnection, Delivery, DeliveryStream, Publishing,
};
pub use error::{BrokerError, BrokerResult};
pub use memory::{FailurePoint, MemoryBroker};
