//! Dispatch loops of the connector
//!
//! Each loop runs as an independent async task. They share nothing but the
//! shutdown signal and the publisher handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!   broker (inbound connection)            broker (outbound connection)
//!            │                                        ▲
//!            │ deliveries                             │ publish
//!    ┌───────▼───────┐                       ┌────────┴────────┐
//!    │  InboundLoop  │                       │ PublisherActor  │
//!    └───────┬───────┘                       └───▲─────────▲───┘
//!            │ CheckRequest                      │         │
//!            ▼                          ┌────────┴───┐ ┌───┴───────────┐
//!          agent ──── AgentMessage ───▶ │OutboundLoop│ │ KeepaliveLoop │
//!                                       └────────────┘ └───────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **InboundLoop**: decodes deliveries, acknowledges them, forwards requests
//! - **OutboundLoop**: publishes check results coming from the agent
//! - **KeepaliveLoop**: publishes a keepalive every interval
//! - **PublisherActor**: the single writer on the outbound channel
//!
//! All loops stop when the shared [`messages::ShutdownSignal`] fires.

pub mod inbound;
pub mod keepalive;
pub mod messages;
pub mod outbound;
pub mod publisher;
