use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Body accepted by both the email and the push endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct SendNotificationRequest {
    pub user_id: String,
    pub template_id: String,

    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
}
