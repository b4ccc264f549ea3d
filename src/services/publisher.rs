use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use tracing::{debug, info};

use crate::{
    clients::rbmq::{
        Broker, BrokerTopology, OutboundMessage, PERSISTENT_DELIVERY_MODE, PublishError,
    },
    models::message::{NotificationKind, NotificationMessage},
};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Owns the exchange/queue layout and turns accepted notifications into durable
/// broker messages. Publishing is attempted once; retries belong to the caller.
pub struct QueuePublisher {
    broker: Arc<dyn Broker>,
    topology: BrokerTopology,
}

impl QueuePublisher {
    pub fn new(broker: Arc<dyn Broker>, topology: BrokerTopology) -> Self {
        Self { broker, topology }
    }

    pub fn topology(&self) -> &BrokerTopology {
        &self.topology
    }

    pub async fn declare_topology(&self) -> Result<(), Error> {
        self.broker.declare_topology(&self.topology).await
    }

    pub async fn publish(
        &self,
        kind: NotificationKind,
        message: &NotificationMessage,
    ) -> Result<(), PublishError> {
        if message.kind() != kind {
            return Err(PublishError::NotSent(anyhow!(
                "Message {} is a {} notification, refusing to route it as {}",
                message.id(),
                message.kind(),
                kind
            )));
        }

        let payload = serde_json::to_vec(message).map_err(|e| {
            PublishError::NotSent(anyhow!("Failed to serialize notification message: {}", e))
        })?;

        let outbound = OutboundMessage {
            exchange: self.topology.exchange.clone(),
            routing_key: kind.as_str().to_string(),
            payload,
            content_type: JSON_CONTENT_TYPE.to_string(),
            delivery_mode: PERSISTENT_DELIVERY_MODE,
            timestamp: message.created_at().timestamp().max(0) as u64,
        };

        debug!(
            notification_id = %message.id(),
            kind = %kind,
            user_id = message.user_id(),
            template_id = message.template_id(),
            scheduled_for = ?message.scheduled_for(),
            queue = self.topology.queue_for(kind),
            "Publishing notification"
        );

        self.broker.publish(outbound).await?;

        info!(notification_id = %message.id(), kind = %kind, "Notification queued");
        Ok(())
    }
}
