use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    models::preferences::UserPreferences,
    store::{CacheStore, cache_get, cache_set},
};

const API_KEY_HEADER: &str = "X-Internal-API-Key";

/// Source of per-user notification preferences.
#[async_trait]
pub trait PreferenceSource: Send + Sync {
    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences, Error>;
}

/// The profile endpoint answers either with the bare profile or wrapped in
/// the platform's `{success, data}` envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileResponse {
    Wrapped { data: UserPreferences },
    Bare(UserPreferences),
}

/// User-service client with a read-through preference cache.
pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    cache: Arc<dyn CacheStore>,
    cache_ttl: Duration,
}

impl UserServiceClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        cache: Arc<dyn CacheStore>,
        cache_ttl: Duration,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(
            cache_ttl_seconds = cache_ttl.as_secs(),
            "User service client initialized"
        );

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            cache,
            cache_ttl,
        })
    }

    fn cache_key(user_id: &str) -> String {
        format!("user:prefs:{}", user_id)
    }

    async fn fetch(&self, user_id: &str) -> Result<UserPreferences, Error> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|_| anyhow!("Invalid user service URL"))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid user service URL"))?
            .pop_if_empty()
            .extend(["internal", "users", user_id, "notification-profile"]);

        let mut request = self.http_client.get(url);
        if !self.api_key.is_empty() {
            request = request.header(API_KEY_HEADER, &self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("User service request failed: {}", e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(anyhow!("User service returned status {}", status));
        }

        let profile: ProfileResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse notification profile: {}", e))?;

        Ok(match profile {
            ProfileResponse::Wrapped { data } => data,
            ProfileResponse::Bare(preferences) => preferences,
        })
    }
}

#[async_trait]
impl PreferenceSource for UserServiceClient {
    async fn get_preferences(&self, user_id: &str) -> Result<UserPreferences, Error> {
        let cache_key = Self::cache_key(user_id);

        if !self.cache_ttl.is_zero()
            && let Some(cached) = cache_get::<UserPreferences>(self.cache.as_ref(), &cache_key).await
        {
            debug!(user_id, "User preferences served from cache");
            return Ok(cached);
        }

        let preferences = self.fetch(user_id).await?;

        cache_set(self.cache.as_ref(), &cache_key, &preferences, self.cache_ttl).await;

        Ok(preferences)
    }
}
