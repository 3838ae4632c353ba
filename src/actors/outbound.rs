//! OutboundLoop - Publishes the agent's check results
//!
//! ## Message Flow
//!
//! ```text
//! AgentMessage::CheckResult → JSON → PublisherActor → "results" queue
//! AgentMessage::Other       → debug log, dropped
//! ```
//!
//! Results are delivered at most once: a failed serialization or publish is
//! logged and the result is dropped.

use tokio::sync::mpsc;
use tracing::{debug, error, instrument, trace};

use crate::broker::Publishing;
use crate::protocol::{AgentMessage, CheckResult, QUEUE_RESULTS};

use super::messages::ShutdownSignal;
use super::publisher::PublisherHandle;

/// Reads the agent channel and publishes check results
pub struct OutboundLoop {
    client: String,
    from_agent: mpsc::Receiver<AgentMessage>,
    publisher: PublisherHandle,
    shutdown: ShutdownSignal,
}

impl OutboundLoop {
    pub fn new(
        client: String,
        from_agent: mpsc::Receiver<AgentMessage>,
        publisher: PublisherHandle,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            client,
            from_agent,
            publisher,
            shutdown,
        }
    }

    /// Run the loop
    ///
    /// Stops on the shutdown signal or when the agent drops its sender, and
    /// hands the agent receiver back so the loop can be restarted later.
    #[instrument(skip(self), fields(client = %self.client))]
    pub async fn run(mut self) -> mpsc::Receiver<AgentMessage> {
        debug!("starting outbound loop");

        loop {
            let message = tokio::select! {
                _ = self.shutdown.changed() => {
                    debug!("received shutdown signal");
                    break;
                }
                message = self.from_agent.recv() => message,
            };

            match message {
                Some(AgentMessage::CheckResult(result)) => self.publish_result(result).await,
                Some(other) => {
                    debug!(kind = other.kind(), "received execution result with invalid type");
                }
                None => {
                    debug!("agent channel closed");
                    break;
                }
            }
        }

        debug!("outbound loop stopped");
        self.from_agent
    }

    async fn publish_result(&self, result: CheckResult) {
        let check = result.result.name.clone();

        let body = match serde_json::to_vec(&result) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, check = %check, "failed to marshal execution result");
                return;
            }
        };

        match self
            .publisher
            .publish(QUEUE_RESULTS, Publishing::transient_json(body))
            .await
        {
            Ok(()) => trace!(check = %check, "published execution result"),
            Err(e) => error!(error = %e, check = %check, "failed to publish execution result"),
        }
    }
}
