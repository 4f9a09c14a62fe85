use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::{models::status::StatusRecord, store::{CacheStore, StatusLedger}};

#[derive(Debug, Clone)]
enum Entry {
    Marker,
    Json(JsonValue),
    Counter(u64),
}

/// Process-local [`CacheStore`]. Expired keys are dropped lazily on access.
///
/// `set_available(false)` makes every call fail, which lets callers exercise
/// the store-down paths.
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (Entry, Instant)>>,
    available: Mutex<bool>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: Mutex::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        *self.available.lock() = available;
    }

    pub fn contains(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        Self::live(&mut entries, key).is_some()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), Error> {
        if *self.available.lock() {
            Ok(())
        } else {
            Err(anyhow!("cache store unavailable"))
        }
    }

    fn live<'a>(
        entries: &'a mut HashMap<String, (Entry, Instant)>,
        key: &str,
    ) -> Option<&'a mut Entry> {
        let expired = entries
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at <= Instant::now());
        if expired {
            entries.remove(key);
        }
        entries.get_mut(key).map(|(entry, _)| entry)
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, Error> {
        self.check_available()?;

        let mut entries = self.entries.lock();
        if Self::live(&mut entries, key).is_some() {
            return Ok(false);
        }

        entries.insert(key.to_string(), (Entry::Marker, Instant::now() + ttl));
        Ok(true)
    }

    async fn get_json(&self, key: &str) -> Result<Option<JsonValue>, Error> {
        self.check_available()?;

        let mut entries = self.entries.lock();
        Ok(match Self::live(&mut entries, key) {
            Some(Entry::Json(value)) => Some(value.clone()),
            _ => None,
        })
    }

    async fn set_json(&self, key: &str, value: &JsonValue, ttl: Duration) -> Result<(), Error> {
        self.check_available()?;

        self.entries.lock().insert(
            key.to_string(),
            (Entry::Json(value.clone()), Instant::now() + ttl),
        );
        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<u64, Error> {
        self.check_available()?;

        let mut entries = self.entries.lock();
        let count = match Self::live(&mut entries, key) {
            Some(Entry::Counter(count)) => *count + 1,
            _ => 1,
        };
        entries.insert(
            key.to_string(),
            (Entry::Counter(count), Instant::now() + window),
        );
        Ok(count)
    }

    async fn ping(&self) -> Result<(), Error> {
        self.check_available()
    }
}

/// Process-local [`StatusLedger`] with the same last-writer-wins rule as the
/// Postgres ledger.
#[derive(Debug)]
pub struct MemoryStatusLedger {
    rows: Mutex<HashMap<String, StatusRecord>>,
    available: Mutex<bool>,
    writes: Mutex<Vec<StatusRecord>>,
}

impl MemoryStatusLedger {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            available: Mutex::new(true),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        *self.available.lock() = available;
    }

    /// Every accepted upsert call, in call order, including superseded ones.
    pub fn history(&self, request_id: &str) -> Vec<StatusRecord> {
        self.writes
            .lock()
            .iter()
            .filter(|record| record.request_id == request_id)
            .cloned()
            .collect()
    }

    fn check_available(&self) -> Result<(), Error> {
        if *self.available.lock() {
            Ok(())
        } else {
            Err(anyhow!("status ledger unavailable"))
        }
    }
}

impl Default for MemoryStatusLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusLedger for MemoryStatusLedger {
    async fn upsert(&self, record: &StatusRecord) -> Result<(), Error> {
        self.check_available()?;

        self.writes.lock().push(record.clone());

        let mut rows = self.rows.lock();
        let replace = rows
            .get(&record.request_id)
            .is_none_or(|existing| record.supersedes(existing));
        if replace {
            rows.insert(record.request_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn get(&self, request_id: &str) -> Result<Option<StatusRecord>, Error> {
        self.check_available()?;
        Ok(self.rows.lock().get(request_id).cloned())
    }

    async fn ping(&self) -> Result<(), Error> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::models::status::NotificationStatus;

    #[tokio::test]
    async fn try_acquire_is_exclusive_until_expiry() {
        let store = MemoryCacheStore::new();

        assert!(store.try_acquire("k", Duration::from_millis(30)).await.unwrap());
        assert!(!store.try_acquire("k", Duration::from_millis(30)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.try_acquire("k", Duration::from_millis(30)).await.unwrap());
    }

    #[tokio::test]
    async fn increment_counts_within_window() {
        let store = MemoryCacheStore::new();

        assert_eq!(store.increment("c", Duration::from_secs(5)).await.unwrap(), 1);
        assert_eq!(store.increment("c", Duration::from_secs(5)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryCacheStore::new();
        store.set_available(false);

        assert!(store.try_acquire("k", Duration::from_secs(1)).await.is_err());
        assert!(store.get_json("k").await.is_err());
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn ledger_keeps_latest_write_regardless_of_arrival_order() {
        let ledger = MemoryStatusLedger::new();
        let now = Utc::now();

        let sent = StatusRecord::new("R1", NotificationStatus::Sent)
            .with_provider("fcm")
            .at(now + ChronoDuration::seconds(2));
        let processing = StatusRecord::new("R1", NotificationStatus::Processing).at(now);

        ledger.upsert(&sent).await.unwrap();
        ledger.upsert(&processing).await.unwrap();

        let row = ledger.get("R1").await.unwrap().unwrap();
        assert_eq!(row.status, NotificationStatus::Sent);
        assert_eq!(row.provider, "fcm");
        assert_eq!(ledger.history("R1").len(), 2);
    }
}
