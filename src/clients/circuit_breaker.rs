use std::{future::Future, time::Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitState, Counts};

#[derive(Debug, Error)]
pub enum CircuitError<E> {
    #[error("circuit breaker is open for {0}")]
    Open(String),

    #[error("circuit breaker for {0} is half-open and out of trial calls")]
    TooManyRequests(String),

    #[error(transparent)]
    Failed(E),
}

impl<E> CircuitError<E> {
    /// True when the call was refused without reaching the dependency.
    pub fn is_rejected(&self) -> bool {
        !matches!(self, CircuitError::Failed(_))
    }
}

struct Inner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// Fail-fast wrapper around one remote dependency. Each dependency owns its own
/// instance; state lives in memory and resets with the process.
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        let mut inner = Inner {
            state: CircuitState::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
        };
        Self::start_generation(&config, &mut inner, Instant::now());

        Self {
            service_name,
            config,
            inner: Mutex::new(inner),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    pub fn counts(&self) -> Counts {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.counts
    }

    /// Runs `operation` unless the circuit refuses it. `Err` results count as
    /// failures; a call dropped before it completes counts as a failure too.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let generation = self.before_call()?;
        let mut guard = CallGuard {
            breaker: self,
            generation,
            finished: false,
        };

        let result = operation().await;
        guard.finish(result.is_ok());

        result.map_err(CircuitError::Failed)
    }

    fn before_call<E>(&self) -> Result<u64, CircuitError<E>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());

        match inner.state {
            CircuitState::Open => {
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                return Err(CircuitError::Open(self.service_name.clone()));
            }
            CircuitState::HalfOpen
                if inner.counts.requests >= self.config.max_half_open_requests =>
            {
                debug!(service = %self.service_name, "Half-open trial budget exhausted");
                return Err(CircuitError::TooManyRequests(self.service_name.clone()));
            }
            _ => {}
        }

        inner.counts.on_request();
        Ok(inner.generation)
    }

    fn after_call(&self, generation: u64, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        self.refresh(&mut inner, now);

        // Results from before the last transition belong to a stale window.
        if inner.generation != generation {
            return;
        }

        if success {
            self.on_success(&mut inner, now);
        } else {
            self.on_failure(&mut inner, now);
        }
    }

    fn on_success(&self, inner: &mut Inner, now: Instant) {
        inner.counts.on_success();

        if inner.state == CircuitState::HalfOpen
            && inner.counts.consecutive_successes >= self.config.max_half_open_requests
        {
            self.transition(inner, CircuitState::Closed, now);
        }
    }

    fn on_failure(&self, inner: &mut Inner, now: Instant) {
        inner.counts.on_failure();

        match inner.state {
            CircuitState::Closed => {
                debug!(
                    service = %self.service_name,
                    failures = inner.counts.total_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );
                if inner.counts.total_failures >= self.config.failure_threshold {
                    self.transition(inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.transition(inner, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        let expired = inner.expiry.is_some_and(|expiry| expiry <= now);
        if !expired {
            return;
        }

        match inner.state {
            CircuitState::Closed => Self::start_generation(&self.config, inner, now),
            CircuitState::Open => self.transition(inner, CircuitState::HalfOpen, now),
            CircuitState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }

        let from = inner.state;
        inner.state = state;
        Self::start_generation(&self.config, inner, now);

        match state {
            CircuitState::Open => warn!(
                service = %self.service_name,
                from = from.as_str(),
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => info!(
                service = %self.service_name,
                "Circuit breaker half-open, admitting trial calls"
            ),
            CircuitState::Closed => info!(
                service = %self.service_name,
                "Circuit breaker closed after successful recovery"
            ),
        }
    }

    fn start_generation(config: &CircuitBreakerConfig, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts.clear();
        inner.expiry = match inner.state {
            CircuitState::Closed if config.interval.is_zero() => None,
            CircuitState::Closed => Some(now + config.interval),
            CircuitState::Open => Some(now + config.timeout),
            CircuitState::HalfOpen => None,
        };
    }
}

struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    finished: bool,
}

impl CallGuard<'_> {
    fn finish(&mut self, success: bool) {
        self.finished = true;
        self.breaker.after_call(self.generation, success);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.after_call(self.generation, false);
        }
    }
}
