use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Email,
    Push,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 2] = [NotificationKind::Email, NotificationKind::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Email => "email",
            NotificationKind::Push => "push",
        }
    }
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to the broker. Fields are private so a message cannot change
/// after it has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    id: Uuid,

    #[serde(rename = "type")]
    kind: NotificationKind,

    user_id: String,
    template_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_for: Option<DateTime<Utc>>,

    #[serde(rename = "timestamp")]
    created_at: DateTime<Utc>,
}

impl NotificationMessage {
    pub fn new(
        kind: NotificationKind,
        user_id: impl Into<String>,
        template_id: impl Into<String>,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            user_id: user_id.into(),
            template_id: template_id.into(),
            scheduled_for,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.scheduled_for
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_broker_field_names() {
        let message = NotificationMessage::new(NotificationKind::Push, "u1", "t1", None);
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "push");
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["template_id"], "t1");
        assert!(json.get("timestamp").is_some());
        assert!(json.get("scheduled_for").is_none());
    }

    #[test]
    fn every_message_gets_a_fresh_id() {
        let a = NotificationMessage::new(NotificationKind::Email, "u1", "t1", None);
        let b = NotificationMessage::new(NotificationKind::Email, "u1", "t1", None);

        assert_ne!(a.id(), b.id());
    }
}
