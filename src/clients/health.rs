use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{rbmq::Broker, redis::TtlStore},
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
};

const CACHE_SERVICE: &str = "cache_service";
const MESSAGE_BROKER: &str = "message_broker";

pub struct HealthChecker {
    store: Arc<dyn TtlStore>,
    broker: Arc<dyn Broker>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn TtlStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    pub async fn check_all(
        &self,
        circuits: impl IntoIterator<Item = (&'static str, CircuitState)>,
    ) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert(CACHE_SERVICE.to_string(), self.check_store().await);
        checks.insert(MESSAGE_BROKER.to_string(), self.check_broker());

        for (name, state) in circuits {
            debug!(service = name, circuit_state = state.as_str(), "Circuit breaker state checked");
            checks.insert(format!("{}_service", name), ServiceHealth::from_circuit(state));
        }

        HealthCheckResponse {
            status: Self::overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.store.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Cache health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Cache health check failed");
                ServiceHealth::unhealthy(e.to_string())
            }
        }
    }

    fn check_broker(&self) -> ServiceHealth {
        if self.broker.is_connected() {
            ServiceHealth::healthy(0)
        } else {
            warn!("Broker channel is not connected");
            ServiceHealth::unhealthy("Broker channel is not connected".to_string())
        }
    }

    fn overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let critical_unhealthy = [CACHE_SERVICE, MESSAGE_BROKER].iter().any(|name| {
            checks
                .get(*name)
                .is_some_and(|health| health.status == HealthStatus::Unhealthy)
        });

        let degraded = checks
            .values()
            .any(|health| health.status != HealthStatus::Healthy);

        if critical_unhealthy {
            HealthStatus::Unhealthy
        } else if degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
