use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info};

use crate::models::message::NotificationKind;

pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Exchange plus one durable queue per notification kind, bound by kind.
#[derive(Debug, Clone)]
pub struct BrokerTopology {
    pub exchange: String,
    pub email_queue: String,
    pub push_queue: String,
}

impl BrokerTopology {
    pub fn queue_for(&self, kind: NotificationKind) -> &str {
        match kind {
            NotificationKind::Email => &self.email_queue,
            NotificationKind::Push => &self.push_queue,
        }
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&str, &'static str)> {
        NotificationKind::ALL
            .into_iter()
            .map(|kind| (self.queue_for(kind), kind.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub delivery_mode: u8,
    pub timestamp: u64,
}

/// Why a publish did not complete. The split decides whether the message may
/// already sit in a queue.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Nothing reached the broker.
    #[error("message not sent: {0}")]
    NotSent(anyhow::Error),

    /// The message went out on the channel but was never positively confirmed.
    #[error("message sent but not confirmed: {0}")]
    Unconfirmed(anyhow::Error),
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_topology(&self, topology: &BrokerTopology) -> Result<(), Error>;

    /// Resolves once the broker has taken responsibility for the message.
    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;

    fn is_connected(&self) -> bool;
}

pub struct RabbitMqClient {
    _connection: Connection,
    channel: Channel,
}

impl RabbitMqClient {
    pub async fn connect(rabbitmq_url: &str) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Connection::connect(rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {}", e))?;

        info!("RabbitMQ channel ready with publisher confirms");

        Ok(Self {
            _connection: connection,
            channel,
        })
    }
}

#[async_trait]
impl Broker for RabbitMqClient {
    async fn declare_topology(&self, topology: &BrokerTopology) -> Result<(), Error> {
        self.channel
            .exchange_declare(
                topology.exchange.as_str(),
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare exchange {}: {}", topology.exchange, e))?;

        for (queue, routing_key) in topology.bindings() {
            self.channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue, e))?;

            self.channel
                .queue_bind(
                    queue,
                    topology.exchange.as_str(),
                    routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to bind queue {}: {}", queue, e))?;

            debug!(queue, routing_key, exchange = %topology.exchange, "Queue declared and bound");
        }

        info!(exchange = %topology.exchange, "Broker topology declared");
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_content_type(message.content_type.as_str().into())
            .with_delivery_mode(message.delivery_mode)
            .with_timestamp(message.timestamp);

        let pending = self
            .channel
            .basic_publish(
                message.exchange.as_str(),
                message.routing_key.as_str(),
                BasicPublishOptions::default(),
                &message.payload,
                properties,
            )
            .await
            .map_err(|e| PublishError::NotSent(anyhow!("Failed to publish message: {}", e)))?;

        let confirmation = pending
            .await
            .map_err(|e| PublishError::Unconfirmed(anyhow!("Failed to confirm publish: {}", e)))?;

        if confirmation.is_nack() {
            return Err(PublishError::Unconfirmed(anyhow!(
                "Broker nacked message for routing key {}",
                message.routing_key
            )));
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.channel.status().connected()
    }
}
