use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    error::{DispatchError, ErrorClass},
    models::{
        circuit_breaker::CircuitState,
        message::{NotificationKind, NotificationMessage},
        request::SendNotificationRequest,
        response::NotificationResponse,
        status::{DeliveryStatus, NotificationStatus},
        validation::{Validation, validate_request},
    },
    services::{
        idempotency::IdempotencyGuard, publisher::QueuePublisher, status::StatusStore,
        validator::DependencyValidator,
    },
};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// End-to-end budget for one request, covering every I/O step.
    pub request_timeout: Duration,
    /// Hand the correlation id back when a request fails before anything was published.
    pub release_reservation_on_failure: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            release_reservation_on_failure: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReceipt {
    pub notification_id: Uuid,
    pub status: DeliveryStatus,
    pub queued_at: DateTime<Utc>,
}

impl From<DispatchReceipt> for NotificationResponse {
    fn from(receipt: DispatchReceipt) -> Self {
        Self {
            notification_id: receipt.notification_id,
            status: receipt.status,
            queued_at: receipt.queued_at,
        }
    }
}

/// Runs one dispatch request through reservation, validation, publish and
/// status bookkeeping, in that order. Safe to share across concurrent requests.
pub struct Dispatcher {
    guard: IdempotencyGuard,
    users: DependencyValidator,
    templates: DependencyValidator,
    publisher: QueuePublisher,
    statuses: StatusStore,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        guard: IdempotencyGuard,
        users: DependencyValidator,
        templates: DependencyValidator,
        publisher: QueuePublisher,
        statuses: StatusStore,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            guard,
            users,
            templates,
            publisher,
            statuses,
            settings,
        }
    }

    pub fn circuit_states(&self) -> [(&'static str, CircuitState); 2] {
        [
            (self.users.name(), self.users.circuit_state()),
            (self.templates.name(), self.templates.circuit_state()),
        ]
    }

    pub async fn dispatch(
        &self,
        kind: NotificationKind,
        request: &SendNotificationRequest,
        correlation_id: &str,
    ) -> Result<DispatchReceipt, DispatchError> {
        validate_request(request).map_err(|e| DispatchError::BadRequest(e.to_string()))?;

        let deadline = Instant::now() + self.settings.request_timeout;
        let result = match timeout_at(deadline, self.run(kind, request, correlation_id)).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Timeout(self.settings.request_timeout)),
        };

        match &result {
            Ok(receipt) => info!(
                correlation_id,
                notification_id = %receipt.notification_id,
                user_id = %request.user_id,
                template_id = %request.template_id,
                kind = %kind,
                "Notification accepted"
            ),
            Err(e) => {
                self.report_failure(kind, correlation_id, e);
                if self.settings.release_reservation_on_failure && e.nothing_published() {
                    self.release_reservation(correlation_id, deadline).await;
                }
            }
        }

        result
    }

    pub async fn status(
        &self,
        notification_id: Uuid,
    ) -> Result<Option<NotificationStatus>, DispatchError> {
        let read = self.statuses.read_status(notification_id);

        match timeout(self.settings.request_timeout, read).await {
            Ok(result) => result.map_err(DispatchError::StatusRead),
            Err(_) => Err(DispatchError::Timeout(self.settings.request_timeout)),
        }
    }

    async fn run(
        &self,
        kind: NotificationKind,
        request: &SendNotificationRequest,
        correlation_id: &str,
    ) -> Result<DispatchReceipt, DispatchError> {
        let already_reserved = self
            .guard
            .check_and_reserve(correlation_id)
            .await
            .map_err(DispatchError::IdempotencyStore)?;

        if already_reserved {
            return Err(DispatchError::Duplicate(correlation_id.to_string()));
        }

        let (user, template) = tokio::join!(
            self.users.validate(&request.user_id),
            self.templates.validate(&request.template_id)
        );

        match user {
            Validation::Valid => {}
            Validation::Invalid { reason } => return Err(DispatchError::InvalidUser(reason)),
            Validation::Unavailable { reason } => {
                return Err(DispatchError::UserServiceUnavailable(reason));
            }
        }

        match template {
            Validation::Valid => {}
            Validation::Invalid { reason } => return Err(DispatchError::InvalidTemplate(reason)),
            Validation::Unavailable { reason } => {
                return Err(DispatchError::TemplateServiceUnavailable(reason));
            }
        }

        let message = NotificationMessage::new(
            kind,
            request.user_id.as_str(),
            request.template_id.as_str(),
            request.scheduled_for,
        );

        self.publisher.publish(kind, &message).await?;

        // The message is already durable at this point; failing here still
        // leaves it for the consumers.
        self.statuses
            .write_status(message.id(), kind, DeliveryStatus::Processing)
            .await
            .map_err(DispatchError::StatusWrite)?;

        Ok(DispatchReceipt {
            notification_id: message.id(),
            status: DeliveryStatus::Processing,
            queued_at: Utc::now(),
        })
    }

    fn report_failure(&self, kind: NotificationKind, correlation_id: &str, e: &DispatchError) {
        match e.class() {
            ErrorClass::Client => {
                warn!(correlation_id, kind = %kind, error = %e, "Notification rejected")
            }
            ErrorClass::DependencyUnavailable => {
                warn!(correlation_id, kind = %kind, error = %e, "Dependency unavailable, notification not accepted")
            }
            ErrorClass::Infrastructure => {
                error!(correlation_id, kind = %kind, error = %e, "Notification dispatch failed")
            }
        }
    }

    async fn release_reservation(&self, correlation_id: &str, deadline: Instant) {
        match timeout_at(deadline, self.guard.release(correlation_id)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(correlation_id, error = %e, "Failed to release idempotency reservation")
            }
            Err(_) => {
                warn!(correlation_id, "Deadline passed before idempotency reservation was released")
            }
        }
    }
}
