//! Capability interfaces for the two shared external stores.
//!
//! [`CacheStore`] backs both the idempotency lock and the preference cache.
//! Those two uses fail differently on purpose: lock and counter operations
//! propagate store errors to the caller, while [`cache_get`] and
//! [`cache_set`] turn any store failure into a miss and only log it.

mod memory;

use std::time::Duration;

use anyhow::{Error, Result};
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use tracing::warn;

pub use memory::{MemoryCacheStore, MemoryStatusLedger};

use crate::models::status::StatusRecord;

/// TTL-keyed key/value store shared by every gateway instance.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Creates `key` with an expiry if it is absent. Returns `false` when the
    /// key already existed.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, Error>;

    async fn get_json(&self, key: &str) -> Result<Option<JsonValue>, Error>;

    async fn set_json(&self, key: &str, value: &JsonValue, ttl: Duration) -> Result<(), Error>;

    /// Increments a counter that expires `window` after its last increment and
    /// returns the new count.
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, Error>;

    async fn ping(&self) -> Result<(), Error>;
}

/// Durable per-request status store.
#[async_trait]
pub trait StatusLedger: Send + Sync {
    /// Inserts or replaces the row for `record.request_id`. An existing row
    /// with a later `updated_at` is left untouched.
    async fn upsert(&self, record: &StatusRecord) -> Result<(), Error>;

    async fn get(&self, request_id: &str) -> Result<Option<StatusRecord>, Error>;

    async fn ping(&self) -> Result<(), Error>;
}

/// Read-through lookup that treats an unreachable store or a corrupt entry as
/// a miss.
pub async fn cache_get<T: DeserializeOwned>(store: &dyn CacheStore, key: &str) -> Option<T> {
    match store.get_json(key).await {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(key, error = %e, "Discarding undecodable cache entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!(key, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

/// Best-effort cache population. Failures are logged and dropped.
pub async fn cache_set<T: Serialize>(store: &dyn CacheStore, key: &str, value: &T, ttl: Duration) {
    if ttl.is_zero() {
        return;
    }

    let value = match serde_json::to_value(value) {
        Ok(value) => value,
        Err(e) => {
            warn!(key, error = %e, "Failed to serialize cache entry");
            return;
        }
    };

    if let Err(e) = store.set_json(key, &value, ttl).await {
        warn!(key, error = %e, "Cache write failed, continuing without cache");
    }
}
