use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result};
use tracing::debug;

use crate::clients::redis::TtlStore;

const PROCESSING_MARKER: &str = "processing";

/// Reserves correlation ids so a retried request is accepted at most once per TTL window.
pub struct IdempotencyGuard {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn key_for(correlation_id: &str) -> String {
        format!("idempotency:{}", correlation_id)
    }

    /// Returns `true` when the id was already reserved. Reservation is a single
    /// set-if-absent, so two concurrent callers can never both get `false`.
    pub async fn check_and_reserve(&self, correlation_id: &str) -> Result<bool, Error> {
        let key = Self::key_for(correlation_id);
        let reserved = self
            .store
            .set_nx_ex(&key, PROCESSING_MARKER, self.ttl)
            .await?;

        debug!(correlation_id, reserved, "Idempotency reservation attempted");
        Ok(!reserved)
    }

    pub async fn release(&self, correlation_id: &str) -> Result<(), Error> {
        self.store.delete(&Self::key_for(correlation_id)).await?;
        debug!(correlation_id, "Idempotency reservation released");
        Ok(())
    }

    pub async fn is_reserved(&self, correlation_id: &str) -> Result<bool, Error> {
        self.store.exists(&Self::key_for(correlation_id)).await
    }
}
