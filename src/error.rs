use std::time::Duration;

use axum::http::StatusCode;
use thiserror::Error;

use crate::clients::rbmq::PublishError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is at fault; retrying it unchanged will not help.
    Client,
    /// A dependency could not answer; the same request may succeed later.
    DependencyUnavailable,
    /// Our own infrastructure failed; the request was not accepted.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("request with correlation id {0} is already being processed")]
    Duplicate(String),

    #[error("user validation failed: {0}")]
    InvalidUser(String),

    #[error("template validation failed: {0}")]
    InvalidTemplate(String),

    #[error("user service unavailable: {0}")]
    UserServiceUnavailable(String),

    #[error("template service unavailable: {0}")]
    TemplateServiceUnavailable(String),

    #[error("idempotency store failure: {0}")]
    IdempotencyStore(anyhow::Error),

    #[error("failed to publish notification: {0}")]
    Publish(anyhow::Error),

    #[error("notification publish was not confirmed: {0}")]
    PublishUnconfirmed(anyhow::Error),

    #[error("failed to record notification status: {0}")]
    StatusWrite(anyhow::Error),

    #[error("failed to read notification status: {0}")]
    StatusRead(anyhow::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl DispatchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            DispatchError::BadRequest(_)
            | DispatchError::Duplicate(_)
            | DispatchError::InvalidUser(_)
            | DispatchError::InvalidTemplate(_) => ErrorClass::Client,
            DispatchError::UserServiceUnavailable(_)
            | DispatchError::TemplateServiceUnavailable(_)
            | DispatchError::Timeout(_) => ErrorClass::DependencyUnavailable,
            DispatchError::IdempotencyStore(_)
            | DispatchError::Publish(_)
            | DispatchError::PublishUnconfirmed(_)
            | DispatchError::StatusWrite(_)
            | DispatchError::StatusRead(_) => ErrorClass::Infrastructure,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => match self.class() {
                ErrorClass::Client => StatusCode::BAD_REQUEST,
                ErrorClass::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorClass::Infrastructure => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Client-facing summary that goes in the `message` field of the response.
    pub fn summary(&self) -> &'static str {
        match self {
            DispatchError::BadRequest(_) => "Bad Request",
            DispatchError::Duplicate(_) => "Notification is already being processed",
            DispatchError::InvalidUser(_) => "User not found or unavailable",
            DispatchError::InvalidTemplate(_) => "Template not found or unavailable",
            DispatchError::UserServiceUnavailable(_) => "User service unavailable",
            DispatchError::TemplateServiceUnavailable(_) => "Template service unavailable",
            DispatchError::IdempotencyStore(_) => "Failed to check request idempotency",
            DispatchError::Publish(_) => "Failed to publish to queue",
            DispatchError::PublishUnconfirmed(_) => "Failed to confirm publish to queue",
            DispatchError::StatusWrite(_) => "Failed to store the notification status",
            DispatchError::StatusRead(_) => "Failed to read the notification status",
            DispatchError::Timeout(_) => "Request timed out",
        }
    }

    /// Whether the failure happened before anything reached the broker, so the
    /// correlation id can be handed back to the client for a retry.
    pub fn nothing_published(&self) -> bool {
        matches!(
            self,
            DispatchError::InvalidUser(_)
                | DispatchError::InvalidTemplate(_)
                | DispatchError::UserServiceUnavailable(_)
                | DispatchError::TemplateServiceUnavailable(_)
                | DispatchError::Publish(_)
        )
    }
}

impl From<PublishError> for DispatchError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::NotSent(e) => DispatchError::Publish(e),
            PublishError::Unconfirmed(e) => DispatchError::PublishUnconfirmed(e),
        }
    }
}
