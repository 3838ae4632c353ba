//! Message types for actor communication
//!
//! The dispatch loops never touch the outbound broker channel themselves.
//! They send [`PublishCommand`]s to the publisher actor, which is the only
//! writer on that channel.

use tokio::sync::{oneshot, watch};

use crate::broker::{BrokerResult, Publishing};

/// Commands that can be sent to the PublisherActor
#[derive(Debug)]
pub enum PublishCommand {
    /// Publish `message` to the default exchange, routed to `queue`
    Publish {
        queue: String,
        message: Publishing,
        /// Channel to send the broker's answer back
        respond_to: oneshot::Sender<BrokerResult<()>>,
    },
}

/// Receiving side of the shutdown signal shared by all loops
///
/// A loop stops as soon as the value changes or the sender is dropped.
pub type ShutdownSignal = watch::Receiver<bool>;
