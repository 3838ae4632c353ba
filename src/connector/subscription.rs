//! Binding the client queue to subscription topics

use tracing::{debug, warn};

use crate::broker::{BrokerConnection, BrokerError};
use crate::error::{ConnectorError, ConnectorResult, SubscriptionFailure};

/// Bind `queue` to every subscription exchange with an empty routing key
///
/// Each topic is bound on its own short-lived channel of `connection`. A
/// failed bind is a channel-level error in AMQP and closes the channel it was
/// issued on, so it must never hit the channel carrying the consumer.
///
/// Failures are logged and collected; binding continues with the next
/// topic. Returns the topics that were bound, in order. Fails only when
/// not a single topic could be bound.
pub async fn bind_subscriptions(
    connection: &dyn BrokerConnection,
    queue: &str,
    subscriptions: &[String],
) -> ConnectorResult<Vec<String>> {
    let mut bound = Vec::with_capacity(subscriptions.len());
    let mut failures = Vec::new();

    for subscription in subscriptions {
        match bind_one(connection, queue, subscription).await {
            Ok(()) => {
                debug!(subscription = %subscription, "subscribed");
                bound.push(subscription.clone());
            }
            Err(error) => {
                warn!(subscription = %subscription, error = %error, "failed to subscribe");
                failures.push(SubscriptionFailure {
                    subscription: subscription.clone(),
                    error,
                });
            }
        }
    }

    if bound.is_empty() {
        return Err(ConnectorError::AllSubscriptionsFailed(failures));
    }
    Ok(bound)
}

async fn bind_one(
    connection: &dyn BrokerConnection,
    queue: &str,
    subscription: &str,
) -> Result<(), BrokerError> {
    let channel = connection.channel().await?;
    let result = channel.bind_queue(queue, subscription, "").await;

    // after a failed bind the broker has already closed the channel
    if let Err(e) = channel.close().await
        && result.is_ok()
    {
        debug!(subscription, error = %e, "failed to close binding channel");
    }
    result
}
