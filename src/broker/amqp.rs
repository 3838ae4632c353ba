//! AMQP 0-9-1 backend built on `lapin`

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, trace};

use super::backend::{
    Acknowledge, Broker, BrokerChannel, BrokerConnection, Delivery, DeliveryStream, Publishing,
};
use super::error::{BrokerError, BrokerResult};

const REPLY_SUCCESS: u16 = 200;

/// Dials RabbitMQ (or any AMQP 0-9-1 broker) through `lapin`
#[derive(Debug, Clone, Default)]
pub struct AmqpBroker;

impl AmqpBroker {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn dial(&self, address: &str) -> BrokerResult<Box<dyn BrokerConnection>> {
        debug!("dialing {address}");
        let connection = Connection::connect(address, ConnectionProperties::default())
            .await
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        Ok(Box::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn channel(&self) -> BrokerResult<Box<dyn BrokerChannel>> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::ChannelFailed(e.to_string()))?;

        trace!(channel = channel.id(), "opened channel");
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> BrokerResult<()> {
        self.connection
            .close(REPLY_SUCCESS, "connector shutdown")
            .await
            .map_err(|e| BrokerError::CloseFailed(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_fanout_exchange(&self, name: &str) -> BrokerResult<()> {
        self.channel
            .exchange_declare(
                name,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::DeclarationFailed(e.to_string()))
    }

    async fn declare_exclusive_queue(&self, name: &str) -> BrokerResult<String> {
        let options = QueueDeclareOptions {
            exclusive: true,
            ..Default::default()
        };

        let queue = self
            .channel
            .queue_declare(name, options, FieldTable::default())
            .await
            .map_err(|e| BrokerError::DeclarationFailed(e.to_string()))?;

        Ok(queue.name().as_str().to_string())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> BrokerResult<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::BindFailed(e.to_string()))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> BrokerResult<DeliveryStream> {
        // no_ack stays false: every delivery is acknowledged explicitly
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::ConsumeFailed(e.to_string()))?;

        let deliveries = consumer.map(|delivery| {
            delivery
                .map(|delivery| {
                    Delivery::new(
                        delivery.data,
                        Box::new(AmqpAcker {
                            acker: delivery.acker,
                        }),
                    )
                })
                .map_err(|e| BrokerError::ConsumeFailed(e.to_string()))
        });

        Ok(deliveries.boxed())
    }

    async fn publish(&self, queue: &str, message: Publishing) -> BrokerResult<()> {
        let properties = BasicProperties::default()
            .with_content_type(message.content_type.as_str().into())
            .with_delivery_mode(message.delivery_mode)
            .with_priority(message.priority);

        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                &message.body,
                properties,
            )
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;

        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.channel
            .close(REPLY_SUCCESS, "connector shutdown")
            .await
            .map_err(|e| BrokerError::CloseFailed(e.to_string()))
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> BrokerResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| BrokerError::AckFailed(e.to_string()))
    }
}
