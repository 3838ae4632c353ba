//! InboundLoop - Translates broker deliveries into check requests
//!
//! ## Message Flow
//!
//! ```text
//! Delivery → decode CheckRequest → ack → forward to agent
//!                    │
//!                    └─ decode error → ack → warn (nothing forwarded)
//! ```
//!
//! Every delivery is acknowledged exactly once, whether or not it decodes,
//! so a malformed message is never redelivered. Requests reach the agent in
//! broker delivery order.

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, instrument, trace, warn};

use crate::broker::{Delivery, DeliveryStream};
use crate::protocol::CheckRequest;

use super::messages::ShutdownSignal;

/// Consumes the client queue and forwards requests to the agent
pub struct InboundLoop {
    client: String,
    deliveries: DeliveryStream,
    to_agent: mpsc::Sender<CheckRequest>,
    shutdown: ShutdownSignal,
}

impl InboundLoop {
    pub fn new(
        client: String,
        deliveries: DeliveryStream,
        to_agent: mpsc::Sender<CheckRequest>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            client,
            deliveries,
            to_agent,
            shutdown,
        }
    }

    /// Run the loop
    ///
    /// Runs until:
    /// - The shutdown signal fires
    /// - The delivery stream ends (connection closed)
    /// - The agent drops its receiver
    #[instrument(skip(self), fields(client = %self.client))]
    pub async fn run(mut self) {
        debug!("starting inbound loop");

        loop {
            let next = tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("received shutdown signal");
                    break;
                }
                next = self.deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if !self.dispatch(delivery).await {
                        break;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "failed to receive delivery"),
                None => {
                    warn!("delivery stream closed");
                    break;
                }
            }
        }

        debug!("inbound loop stopped");
    }

    /// Handle one delivery; returns false when the loop should stop
    async fn dispatch(&mut self, delivery: Delivery) -> bool {
        let decoded = serde_json::from_slice::<CheckRequest>(&delivery.body);

        if let Err(e) = delivery.ack().await {
            warn!(error = %e, "failed to acknowledge delivery");
        }

        let request = match decoded {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    error = %e,
                    request_body = %String::from_utf8_lossy(&delivery.body),
                    "failed to unmarshal request body"
                );
                return true;
            }
        };

        trace!(check = %request.name, issued = request.issued, "forwarding check request");

        tokio::select! {
            sent = self.to_agent.send(request) => {
                if sent.is_err() {
                    warn!("agent channel closed");
                    return false;
                }
                true
            }
            _ = self.shutdown.changed() => false,
        }
    }
}
