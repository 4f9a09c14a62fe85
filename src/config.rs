use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{
    channel::Channel, circuit_breaker::CircuitBreakerConfig, retry::RetryConfig,
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,
    #[serde(default = "default_exchange_name")]
    pub exchange_name: String,
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default = "default_dead_letter_queue")]
    pub dead_letter_queue: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub redis_url: String,
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,
    #[serde(default = "default_user_pref_cache_ttl_seconds")]
    pub user_pref_cache_ttl_seconds: u64,

    pub database_url: String,

    pub user_service_url: String,
    #[serde(default)]
    pub user_service_api_key: String,
    pub template_service_url: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,

    #[serde(default = "default_admission_gates")]
    pub admission_gates: Vec<String>,
    #[serde(default)]
    pub api_tokens: Vec<String>,
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u64,
    #[serde(default = "default_rate_limit_window_seconds")]
    pub rate_limit_window_seconds: u64,

    #[serde(default = "default_circuit_breaker_failure_ratio")]
    pub circuit_breaker_failure_ratio: f64,
    #[serde(default = "default_circuit_breaker_min_requests")]
    pub circuit_breaker_min_requests: u32,
    #[serde(default = "default_circuit_breaker_window_seconds")]
    pub circuit_breaker_window_seconds: u64,
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_circuit_breaker_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default)]
    pub worker_channel: Option<String>,
    #[serde(default)]
    pub fcm_project_id: Option<String>,
    #[serde(default)]
    pub email_api_url: Option<String>,
    #[serde(default)]
    pub email_api_key: Option<String>,
    #[serde(default)]
    pub email_from: Option<String>,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>().map_err(|e| match e {
            envy::Error::MissingValue(field) => {
                anyhow!("Missing environment variable {}", field.to_uppercase())
            }
            envy::Error::Custom(_) => anyhow!("Invalid environment variable value"),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.channels.is_empty() {
            return Err(anyhow!("CHANNELS must name at least one channel"));
        }
        self.configured_channels()?;

        if !(0.0..=1.0).contains(&self.circuit_breaker_failure_ratio) {
            return Err(anyhow!(
                "CIRCUIT_BREAKER_FAILURE_RATIO must be between 0 and 1"
            ));
        }

        if self.retry_backoff_multiplier == 0 {
            return Err(anyhow!("RETRY_BACKOFF_MULTIPLIER must be at least 1"));
        }

        Ok(())
    }

    pub fn configured_channels(&self) -> Result<Vec<Channel>, Error> {
        self.channels
            .iter()
            .map(|name| {
                Channel::parse(name).ok_or_else(|| anyhow!("Unknown channel '{}' in CHANNELS", name))
            })
            .collect()
    }

    pub fn worker_channel(&self) -> Result<Channel, Error> {
        let name = self
            .worker_channel
            .as_deref()
            .ok_or_else(|| anyhow!("Missing environment variable WORKER_CHANNEL"))?;

        Channel::parse(name).ok_or_else(|| anyhow!("Unknown WORKER_CHANNEL '{}'", name))
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }

    pub fn user_pref_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.user_pref_cache_ttl_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_ratio: self.circuit_breaker_failure_ratio,
            min_requests: self.circuit_breaker_min_requests,
            window_seconds: self.circuit_breaker_window_seconds,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }
}

fn default_exchange_name() -> String {
    "notifications.direct".to_string()
}

fn default_channels() -> Vec<String> {
    vec!["email".to_string(), "push".to_string()]
}

fn default_dead_letter_queue() -> String {
    "failed.queue".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_idempotency_ttl_seconds() -> u64 {
    24 * 60 * 60
}

fn default_user_pref_cache_ttl_seconds() -> u64 {
    300
}

fn default_http_timeout_seconds() -> u64 {
    5
}

fn default_admission_gates() -> Vec<String> {
    vec![
        "auth".to_string(),
        "rate_limit".to_string(),
        "circuit_breaker".to_string(),
    ]
}

fn default_rate_limit_requests() -> u64 {
    100
}

fn default_rate_limit_window_seconds() -> u64 {
    60
}

fn default_circuit_breaker_failure_ratio() -> f64 {
    0.5
}

fn default_circuit_breaker_min_requests() -> u32 {
    10
}

fn default_circuit_breaker_window_seconds() -> u64 {
    60
}

fn default_circuit_breaker_timeout_seconds() -> u64 {
    30
}

fn default_circuit_breaker_success_threshold() -> u32 {
    1
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
