//! KeepaliveLoop - Periodic liveness announcements
//!
//! ## Message Flow
//!
//! ```text
//! build Keepalive (now) → JSON → PublisherActor → "keepalives" queue → sleep(interval) ─┐
//!        ↑                                                                              │
//!        └──────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The sleep starts after the publish completes, so the effective period is
//! the interval plus publish latency. Failures are logged and the loop goes
//! on with the next tick.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, instrument, trace};

use crate::broker::Publishing;
use crate::protocol::{KEEPALIVE_VERSION, Keepalive, QUEUE_KEEPALIVES};

use super::messages::ShutdownSignal;
use super::publisher::PublisherHandle;

/// Publishes a keepalive for the client on every tick
pub struct KeepaliveLoop {
    name: String,
    address: String,
    subscriptions: Vec<String>,
    interval: Duration,
    publisher: PublisherHandle,
    shutdown: ShutdownSignal,
}

impl KeepaliveLoop {
    pub fn new(
        name: String,
        address: String,
        subscriptions: Vec<String>,
        interval: Duration,
        publisher: PublisherHandle,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            name,
            address,
            subscriptions,
            interval,
            publisher,
            shutdown,
        }
    }

    #[instrument(skip(self), fields(client = %self.name))]
    pub async fn run(mut self) {
        debug!("starting keepalive loop every {:?}", self.interval);

        loop {
            self.publish_keepalive().await;

            tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!("keepalive loop stopped");
    }

    fn keepalive(&self) -> Keepalive {
        Keepalive {
            name: self.name.clone(),
            address: self.address.clone(),
            subscriptions: self.subscriptions.clone(),
            version: KEEPALIVE_VERSION.to_string(),
            timestamp: Utc::now().timestamp(),
        }
    }

    async fn publish_keepalive(&self) {
        let keepalive = self.keepalive();

        let body = match serde_json::to_vec(&keepalive) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "failed to marshal keepalive body");
                return;
            }
        };

        match self
            .publisher
            .publish(QUEUE_KEEPALIVES, Publishing::transient_json(body))
            .await
        {
            Ok(()) => trace!(timestamp = keepalive.timestamp, "published keepalive"),
            Err(e) => error!(error = %e, "failed to publish keepalive body"),
        }
    }
}
