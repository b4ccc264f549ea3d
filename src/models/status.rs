use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::NotificationKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Processing,
    Delivered,
    Failed,
}

impl Display for DeliveryStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            DeliveryStatus::Processing => write!(f, "processing"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Short-lived progress marker for an accepted notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationStatus {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub kind: NotificationKind,

    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationStatus {
    pub fn new(id: Uuid, kind: NotificationKind, status: DeliveryStatus) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            status,
            created_at: now,
            updated_at: now,
        }
    }
}
