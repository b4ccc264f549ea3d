use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::{
    clients::{
        circuit_breaker::{CircuitBreaker, CircuitError},
        redis::TtlStore,
        remote::EntityChecker,
    },
    models::{circuit_breaker::CircuitState, validation::Validation},
};

const VALID_MARKER: &str = "true";

/// Checks that a referenced entity exists, answering from the cache when it can
/// and going through the dependency's circuit breaker when it can't.
pub struct DependencyValidator {
    name: &'static str,
    cache: Arc<dyn TtlStore>,
    cache_ttl: Duration,
    checker: Arc<dyn EntityChecker>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl DependencyValidator {
    pub fn new(
        name: &'static str,
        cache: Arc<dyn TtlStore>,
        cache_ttl: Duration,
        checker: Arc<dyn EntityChecker>,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            name,
            cache,
            cache_ttl,
            checker,
            circuit_breaker,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn cache_key(&self, id: &str) -> String {
        format!("{}:{}", self.name, id)
    }

    pub async fn validate(&self, id: &str) -> Validation {
        let key = self.cache_key(id);

        match self.cache.get(&key).await {
            Ok(Some(value)) if value == VALID_MARKER => {
                debug!(dependency = self.name, id, "Validation cache hit");
                return Validation::Valid;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(dependency = self.name, id, error = %e, "Validation cache read failed, asking remote service");
            }
        }

        let outcome = self.circuit_breaker.call(|| self.checker.exists(id)).await;

        match outcome {
            Ok(true) => {
                if let Err(e) = self.cache.set_ex(&key, VALID_MARKER, self.cache_ttl).await {
                    warn!(dependency = self.name, id, error = %e, "Failed to cache validation result");
                }
                Validation::Valid
            }
            Ok(false) => Validation::Invalid {
                reason: format!("{} {} was not found", self.name, id),
            },
            Err(CircuitError::Failed(e)) => Validation::Unavailable {
                reason: e.to_string(),
            },
            Err(CircuitError::Open(service)) => Validation::Unavailable {
                reason: format!("circuit breaker is open for {}", service),
            },
            Err(CircuitError::TooManyRequests(service)) => Validation::Unavailable {
                reason: format!("circuit breaker for {} is recovering, try again later", service),
            },
        }
    }
}
