//! PublisherActor - Single writer on the outbound broker channel
//!
//! The outbound loop and the keepalive loop both publish through the same
//! channel. Instead of relying on the client library being safe for
//! concurrent use, every publish is funnelled through this actor.
//!
//! ## Message Flow
//!
//! ```text
//! OutboundLoop ──┐
//!                ├─→ PublishCommand (mpsc) → PublisherActor → BrokerChannel::publish
//! KeepaliveLoop ─┘          ↑                        │
//!                           └──── oneshot reply ─────┘
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::broker::{BrokerChannel, BrokerError, BrokerResult, Publishing};

use super::messages::PublishCommand;

/// Pending publishes buffered before senders wait
const COMMAND_BUFFER: usize = 64;

/// Actor that owns the outbound channel
pub struct PublisherActor {
    channel: Arc<dyn BrokerChannel>,
    command_rx: mpsc::Receiver<PublishCommand>,
}

impl PublisherActor {
    pub fn new(channel: Arc<dyn BrokerChannel>, command_rx: mpsc::Receiver<PublishCommand>) -> Self {
        Self {
            channel,
            command_rx,
        }
    }

    /// Run until every handle has been dropped
    pub async fn run(mut self) {
        debug!("starting publisher actor");

        while let Some(cmd) = self.command_rx.recv().await {
            match cmd {
                PublishCommand::Publish {
                    queue,
                    message,
                    respond_to,
                } => {
                    trace!(queue = %queue, bytes = message.body.len(), "publishing");
                    let result = self.channel.publish(&queue, message).await;
                    let _ = respond_to.send(result);
                }
            }
        }

        debug!("publisher actor stopped");
    }
}

/// Handle for publishing through the PublisherActor
#[derive(Clone)]
pub struct PublisherHandle {
    sender: mpsc::Sender<PublishCommand>,
}

impl PublisherHandle {
    /// Spawn a publisher actor on `channel`
    ///
    /// The actor exits once the returned handle and all its clones are dropped.
    pub fn spawn(channel: Arc<dyn BrokerChannel>) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let actor = PublisherActor::new(channel, cmd_rx);
        let task = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, task)
    }

    /// Publish `message` to `queue` and wait for the broker's answer
    pub async fn publish(&self, queue: &str, message: Publishing) -> BrokerResult<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PublishCommand::Publish {
                queue: queue.to_string(),
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| BrokerError::PublishFailed("publisher has stopped".to_string()))?;

        rx.await
            .map_err(|_| BrokerError::PublishFailed("publisher dropped the request".to_string()))?
    }
}
