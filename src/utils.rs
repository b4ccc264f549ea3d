use std::{fmt::Display, future::Future};

use tokio::time::{Duration, sleep};
use tracing::{info, warn};

use crate::models::retry::RetryConfig;

/// Retries `operation` with exponential backoff and ±10% jitter. Used when
/// bringing up connections at startup; request paths never retry.
pub async fn retry_with_backoff<F, Fut, T, E>(
    label: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay_ms = config.initial_delay_ms;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(target_name = label, attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!(target_name = label, attempts = attempt, error = %error, "Giving up after exhausting retries");
            return Err(error);
        }

        let jitter = rand::random_range(-0.1..=0.1);
        let wait_ms = (delay_ms as f64 * (1.0 + jitter)) as u64;

        warn!(
            target_name = label,
            attempt,
            max_attempts,
            wait_ms,
            error = %error,
            "Attempt failed, backing off"
        );

        sleep(Duration::from_millis(wait_ms)).await;
        delay_ms = delay_ms
            .saturating_mul(config.backoff_multiplier.max(1))
            .min(config.max_delay_ms);
    }
}
