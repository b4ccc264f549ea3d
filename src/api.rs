use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Extension, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderName, HeaderValue, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{Authenticator, bearer_token},
    clients::health::HealthChecker,
    error::{DispatchError, ErrorClass},
    models::{
        health::HealthStatus,
        message::NotificationKind,
        request::SendNotificationRequest,
        response::{ApiResponse, NotificationResponse},
        validation::validate_correlation_id,
    },
    services::Dispatcher,
};

pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

pub struct AppState {
    pub dispatcher: Dispatcher,
    pub authenticator: Arc<dyn Authenticator>,
    pub health_checker: HealthChecker,
}

/// Correlation id for the current request, supplied by the client or generated here.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

pub fn router(state: Arc<AppState>) -> Router {
    let notifications = Router::new()
        .route("/notifications/email", post(send_email))
        .route("/notifications/push", post(send_push))
        .route("/notifications/{id}/status", get(notification_status))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", notifications)
        .layer(middleware::from_fn(correlation_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(port: u16, state: Arc<AppState>) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Notification gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Notification gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn failure(status: StatusCode, error: impl Into<String>, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse::<()>::error(error.into(), message.into())),
    )
        .into_response()
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let error = match self.class() {
            ErrorClass::Infrastructure => "internal server error".to_string(),
            _ => self.to_string(),
        };

        failure(self.status_code(), error, self.summary())
    }
}

async fn correlation_id(mut req: Request, next: Next) -> Response {
    let supplied = req
        .headers()
        .get(&CORRELATION_ID_HEADER)
        .map(|value| value.to_str().map(|s| s.trim().to_string()));

    let id = match supplied {
        None => Uuid::new_v4().to_string(),
        Some(Ok(id)) if validate_correlation_id(&id).is_ok() => id,
        Some(_) => {
            return failure(
                StatusCode::BAD_REQUEST,
                "Invalid X-Correlation-ID header",
                "Bad Request",
            );
        }
    };

    req.extensions_mut().insert(CorrelationId(id.clone()));
    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    response
}

async fn require_auth(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let principal = match bearer_token(header)
        .and_then(|token| state.authenticator.authenticate(token))
    {
        Ok(principal) => principal,
        Err(e) => {
            warn!(error = %e, "Rejected unauthenticated request");
            return failure(StatusCode::UNAUTHORIZED, e.to_string(), "Unauthorized");
        }
    };

    req.extensions_mut().insert(principal);
    next.run(req).await
}

async fn send_email(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<SendNotificationRequest>, JsonRejection>,
) -> Response {
    dispatch(&state, NotificationKind::Email, &correlation, payload).await
}

async fn send_push(
    State(state): State<Arc<AppState>>,
    Extension(correlation): Extension<CorrelationId>,
    payload: Result<Json<SendNotificationRequest>, JsonRejection>,
) -> Response {
    dispatch(&state, NotificationKind::Push, &correlation, payload).await
}

async fn dispatch(
    state: &AppState,
    kind: NotificationKind,
    correlation: &CorrelationId,
    payload: Result<Json<SendNotificationRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            return DispatchError::BadRequest(rejection.body_text()).into_response();
        }
    };

    match state.dispatcher.dispatch(kind, &request, &correlation.0).await {
        Ok(receipt) => {
            let message = match kind {
                NotificationKind::Email => "Email notification queued",
                NotificationKind::Push => "Push notification queued",
            };
            let body = ApiResponse::success(NotificationResponse::from(receipt), message.to_string());
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn notification_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Ok(notification_id) = Uuid::parse_str(&id) else {
        return DispatchError::BadRequest(format!("{} is not a valid notification id", id))
            .into_response();
    };

    match state.dispatcher.status(notification_id).await {
        Ok(Some(status)) => (
            StatusCode::OK,
            Json(ApiResponse::success(status, "Notification status".to_string())),
        )
            .into_response(),
        Ok(None) => failure(
            StatusCode::NOT_FOUND,
            format!("No status recorded for notification {}", notification_id),
            "Notification status not found or expired",
        ),
        Err(e) => e.into_response(),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state
        .health_checker
        .check_all(state.dispatcher.circuit_states())
        .await;

    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}
