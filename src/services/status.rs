use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use tracing::debug;
use uuid::Uuid;

use crate::{
    clients::redis::TtlStore,
    models::{
        message::NotificationKind,
        status::{DeliveryStatus, NotificationStatus},
    },
};

/// Transient per-notification progress markers. Records expire after `ttl`; a
/// read after that legitimately finds nothing.
pub struct StatusStore {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl StatusStore {
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key_for(notification_id: Uuid) -> String {
        format!("notification:{}", notification_id)
    }

    pub async fn write_status(
        &self,
        notification_id: Uuid,
        kind: NotificationKind,
        status: DeliveryStatus,
    ) -> Result<(), Error> {
        let record = NotificationStatus::new(notification_id, kind, status);
        let body = serde_json::to_string(&record)
            .map_err(|e| anyhow!("Failed to serialize notification status: {}", e))?;

        self.store
            .set_ex(&Self::key_for(notification_id), &body, self.ttl)
            .await?;

        debug!(notification_id = %notification_id, status = %status, "Notification status stored");
        Ok(())
    }

    pub async fn read_status(
        &self,
        notification_id: Uuid,
    ) -> Result<Option<NotificationStatus>, Error> {
        let Some(body) = self.store.get(&Self::key_for(notification_id)).await? else {
            return Ok(None);
        };

        let record = serde_json::from_str(&body)
            .map_err(|e| anyhow!("Corrupt status record for {}: {}", notification_id, e))?;

        Ok(Some(record))
    }
}
