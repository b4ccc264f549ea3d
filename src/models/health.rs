use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::circuit_breaker::CircuitState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HashMap<String, ServiceHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitState>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ServiceHealth {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            response_time_ms: Some(response_time_ms),
            circuit_breaker: None,
            error: None,
        }
    }

    pub fn unhealthy(error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: None,
            circuit_breaker: None,
            error: Some(error),
        }
    }

    /// A remote dependency is judged only by its breaker; it never makes the
    /// gateway itself unhealthy.
    pub fn from_circuit(state: CircuitState) -> Self {
        let (status, error) = match state {
            CircuitState::Closed => (HealthStatus::Healthy, None),
            CircuitState::HalfOpen => (
                HealthStatus::Degraded,
                Some("Circuit breaker in recovery mode".to_string()),
            ),
            CircuitState::Open => (
                HealthStatus::Degraded,
                Some("Circuit breaker open, requests are failing fast".to_string()),
            ),
        };

        Self {
            status,
            response_time_ms: None,
            circuit_breaker: Some(state),
            error,
        }
    }
}
