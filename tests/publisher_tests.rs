use std::sync::Arc;

use anyhow::Result;
use notification_gateway::{
    clients::rbmq::{Broker, PERSISTENT_DELIVERY_MODE, PublishError},
    models::message::{NotificationKind, NotificationMessage},
    services::{QueuePublisher, publisher::JSON_CONTENT_TYPE},
};

use crate::support::{RecordingBroker, topology};

fn publisher(broker: &Arc<RecordingBroker>) -> QueuePublisher {
    let shared: Arc<dyn Broker> = broker.clone();
    QueuePublisher::new(shared, topology())
}

/// Test: An accepted notification becomes exactly one persistent JSON message
#[tokio::test]
async fn test_publishes_one_persistent_message_per_notification() -> Result<()> {
    let broker = RecordingBroker::new();
    let publisher = publisher(&broker);
    let message = NotificationMessage::new(NotificationKind::Email, "u1", "t1", None);

    publisher.publish(NotificationKind::Email, &message).await?;

    let published = broker.published();
    assert_eq!(published.len(), 1);

    let outbound = &published[0];
    assert_eq!(outbound.exchange, "notification.direct");
    assert_eq!(outbound.routing_key, "email");
    assert_eq!(outbound.delivery_mode, PERSISTENT_DELIVERY_MODE);
    assert_eq!(outbound.content_type, JSON_CONTENT_TYPE);
    assert_eq!(outbound.timestamp, message.created_at().timestamp() as u64);

    let decoded: NotificationMessage = serde_json::from_slice(&outbound.payload)?;
    assert_eq!(decoded, message);

    Ok(())
}

/// Test: The wire payload uses the field names consumers expect
#[tokio::test]
async fn test_payload_shape_matches_consumer_contract() -> Result<()> {
    let broker = RecordingBroker::new();
    let publisher = publisher(&broker);
    let message = NotificationMessage::new(NotificationKind::Push, "u2", "t2", None);

    publisher.publish(NotificationKind::Push, &message).await?;

    let payload: serde_json::Value = serde_json::from_slice(&broker.published()[0].payload)?;
    assert_eq!(payload["type"], "push");
    assert_eq!(payload["user_id"], "u2");
    assert_eq!(payload["template_id"], "t2");
    assert!(payload["id"].is_string());
    assert!(payload["timestamp"].is_string());
    assert!(payload.get("scheduled_for").is_none());

    Ok(())
}

/// Test: Push messages are routed by their kind, not to the email queue
#[tokio::test]
async fn test_routes_by_kind() -> Result<()> {
    let broker = RecordingBroker::new();
    let publisher = publisher(&broker);

    for kind in NotificationKind::ALL {
        let message = NotificationMessage::new(kind, "u1", "t1", None);
        publisher.publish(kind, &message).await?;
    }

    let keys: Vec<String> = broker
        .published()
        .into_iter()
        .map(|message| message.routing_key)
        .collect();

    assert_eq!(keys, vec!["email".to_string(), "push".to_string()]);
    assert_eq!(publisher.topology().queue_for(NotificationKind::Push), "push.queue");

    Ok(())
}

/// Test: A message is never routed under a kind it was not built for
#[tokio::test]
async fn test_kind_mismatch_is_refused() -> Result<()> {
    let broker = RecordingBroker::new();
    let publisher = publisher(&broker);
    let message = NotificationMessage::new(NotificationKind::Email, "u1", "t1", None);

    let result = publisher.publish(NotificationKind::Push, &message).await;

    assert!(matches!(result, Err(PublishError::NotSent(_))));
    assert!(broker.published().is_empty());

    Ok(())
}

/// Test: Broker failures are surfaced, never retried locally
#[tokio::test]
async fn test_broker_failure_is_reported() -> Result<()> {
    let broker = RecordingBroker::new();
    let publisher = publisher(&broker);
    broker.fail_publishes(true);

    let message = NotificationMessage::new(NotificationKind::Email, "u1", "t1", None);
    let result = publisher.publish(NotificationKind::Email, &message).await;

    assert!(matches!(result, Err(PublishError::NotSent(_))));
    assert!(broker.published().is_empty());

    Ok(())
}

/// Test: A message that left without a confirm is reported as possibly queued
#[tokio::test]
async fn test_lost_confirm_is_reported_as_unconfirmed() -> Result<()> {
    let broker = RecordingBroker::new();
    let publisher = publisher(&broker);
    broker.lose_confirms(true);

    let message = NotificationMessage::new(NotificationKind::Push, "u1", "t1", None);
    let result = publisher.publish(NotificationKind::Push, &message).await;

    assert!(matches!(result, Err(PublishError::Unconfirmed(_))));
    assert_eq!(broker.published().len(), 1);

    Ok(())
}

/// Test: Declaring the topology hands the configured layout to the broker
#[tokio::test]
async fn test_declares_configured_topology() -> Result<()> {
    let broker = RecordingBroker::new();
    let publisher = publisher(&broker);

    publisher.declare_topology().await?;

    let declared = broker.declared();
    assert_eq!(declared.len(), 1);
    assert_eq!(declared[0].exchange, "notification.direct");
    assert_eq!(declared[0].email_queue, "email.queue");

    Ok(())
}
