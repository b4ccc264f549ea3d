use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failures counted in the current window that trip the circuit.
    pub failure_threshold: u32,
    /// Length of the counting window while closed. Zero keeps counts until a transition.
    pub interval: Duration,
    /// Cooldown spent open before trial calls are let through.
    pub timeout: Duration,
    /// Trial calls admitted while half-open; this many successes close the circuit.
    pub max_half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
            max_half_open_requests: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    pub(crate) fn on_request(&mut self) {
        self.requests += 1;
    }

    pub(crate) fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    pub(crate) fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    pub(crate) fn clear(&mut self) {
        *self = Counts::default();
    }
}
