use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde_json::Value as JsonValue;
use tracing::info;

use crate::store::CacheStore;

/// [`CacheStore`] over a single Redis deployment.
///
/// `ConnectionManager` re-establishes the connection on its own, so one
/// instance is shared by every request.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        info!("Connecting to Redis");

        let client =
            Client::open(redis_url).map_err(|_| anyhow!("Failed to create redis client"))?;

        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| anyhow!("Failed to connect to redis: {}", e))?;

        info!("Redis connection established");

        Ok(Self { connection })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().clamp(1, u64::MAX as u128) as u64
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool, Error> {
        let mut conn = self.connection.clone();

        // SET key 1 NX PX ttl replies OK when created and nil when present.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg("1")
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to acquire key: {}", e))?;

        Ok(reply.is_some())
    }

    async fn get_json(&self, key: &str) -> Result<Option<JsonValue>, Error> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| anyhow!("Failed to get cached value: {}", e))?;

        raw.map(|s| serde_json::from_str(&s).map_err(Error::from))
            .transpose()
    }

    async fn set_json(&self, key: &str, value: &JsonValue, ttl: Duration) -> Result<(), Error> {
        let mut conn = self.connection.clone();
        let payload = serde_json::to_string(value)?;

        conn.pset_ex::<_, _, ()>(key, payload, ttl_millis(ttl))
            .await
            .map_err(|e| anyhow!("Failed to set cached value: {}", e))?;

        Ok(())
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<u64, Error> {
        let mut conn = self.connection.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .pexpire(key, ttl_millis(window) as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to increment counter: {}", e))?;

        Ok(count)
    }

    async fn ping(&self) -> Result<(), Error> {
        let mut conn = self.connection.clone();

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Redis ping failed: {}", e))?;

        Ok(())
    }
}
