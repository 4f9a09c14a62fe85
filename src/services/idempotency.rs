use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info};

use crate::{
    error::{Dependency, GatewayError},
    models::status::StatusRecord,
    store::{CacheStore, StatusLedger},
};

/// Result of presenting a request id to the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    FirstSeen,
    /// Seen within the lock window; carries the ledger row verbatim.
    Duplicate(StatusRecord),
}

/// At-most-once admission per `request_id` within the lock TTL.
///
/// The lock is never released early. A request that acquires it and then
/// fails keeps the id owned until the TTL runs out, so client retries of the
/// same id cannot publish twice.
pub struct IdempotencyGate {
    cache: Arc<dyn CacheStore>,
    ledger: Arc<dyn StatusLedger>,
    ttl: Duration,
}

impl IdempotencyGate {
    pub fn new(cache: Arc<dyn CacheStore>, ledger: Arc<dyn StatusLedger>, ttl: Duration) -> Self {
        Self { cache, ledger, ttl }
    }

    pub fn lock_key(request_id: &str) -> String {
        format!("idempotency:{}", request_id)
    }

    pub async fn admit(&self, request_id: &str) -> Result<Admission, GatewayError> {
        let acquired = self
            .cache
            .try_acquire(&Self::lock_key(request_id), self.ttl)
            .await
            .map_err(|e| {
                error!(request_id, error = %e, "Failed to acquire idempotency lock");
                GatewayError::dependency(Dependency::CacheStore)
            })?;

        if acquired {
            debug!(request_id, "Idempotency lock acquired");
            return Ok(Admission::FirstSeen);
        }

        let existing = self.ledger.get(request_id).await.map_err(|e| {
            error!(request_id, error = %e, "Failed to read status for duplicate request");
            GatewayError::dependency(Dependency::StatusLedger)
        })?;

        match existing {
            Some(record) => {
                info!(request_id, status = %record.status, "Duplicate request, replaying status");
                Ok(Admission::Duplicate(record))
            }
            None => {
                error!(request_id, "Duplicate request has no recorded status");
                Err(GatewayError::DuplicateWithoutStatus {
                    request_id: request_id.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::status::NotificationStatus,
        store::{MemoryCacheStore, MemoryStatusLedger},
    };

    fn gate(cache: Arc<MemoryCacheStore>, ledger: Arc<MemoryStatusLedger>) -> IdempotencyGate {
        IdempotencyGate::new(cache, ledger, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn second_presentation_replays_ledger_row() {
        let cache = Arc::new(MemoryCacheStore::new());
        let ledger = Arc::new(MemoryStatusLedger::new());
        let gate = gate(cache.clone(), ledger.clone());

        assert_eq!(gate.admit("R1").await.unwrap(), Admission::FirstSeen);
        assert!(cache.contains("idempotency:R1"));

        let row = StatusRecord::new("R1", NotificationStatus::Queued);
        ledger.upsert(&row).await.unwrap();

        assert_eq!(gate.admit("R1").await.unwrap(), Admission::Duplicate(row));
    }

    #[tokio::test]
    async fn duplicate_without_row_is_reported() {
        let gate = gate(
            Arc::new(MemoryCacheStore::new()),
            Arc::new(MemoryStatusLedger::new()),
        );

        gate.admit("R1").await.unwrap();
        let err = gate.admit("R1").await.unwrap_err();

        assert!(matches!(err, GatewayError::DuplicateWithoutStatus { .. }));
    }

    #[tokio::test]
    async fn lock_store_failure_propagates() {
        let cache = Arc::new(MemoryCacheStore::new());
        cache.set_available(false);
        let gate = gate(cache, Arc::new(MemoryStatusLedger::new()));

        let err = gate.admit("R1").await.unwrap_err();

        assert!(matches!(
            err,
            GatewayError::DependencyUnavailable {
                dependency: Dependency::CacheStore
            }
        ));
    }
}
