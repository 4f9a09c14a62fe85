use std::{collections::HashMap, sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, rbmq::RabbitMqConnection},
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
    store::{CacheStore, StatusLedger},
};

const CRITICAL_CHECKS: &[&str] = &["cache_store", "status_ledger", "message_broker"];

/// Probes the gateway's live dependency handles. Nothing here opens new
/// connections; a check reflects the state of what requests actually use.
pub struct HealthChecker {
    cache: Arc<dyn CacheStore>,
    ledger: Arc<dyn StatusLedger>,
    broker: Option<Arc<RabbitMqConnection>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl HealthChecker {
    pub fn new(cache: Arc<dyn CacheStore>, ledger: Arc<dyn StatusLedger>) -> Self {
        Self {
            cache,
            ledger,
            broker: None,
            breaker: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<RabbitMqConnection>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("cache_store".to_string(), self.check_cache().await);
        checks.insert("status_ledger".to_string(), self.check_ledger().await);

        if let Some(broker) = &self.broker {
            checks.insert("message_broker".to_string(), Self::check_broker(broker).await);
        }

        if let Some(breaker) = &self.breaker {
            checks.insert(
                "circuit_breaker".to_string(),
                Self::check_circuit_breaker(breaker),
            );
        }

        HealthCheckResponse {
            status: Self::determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_cache(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.cache.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Cache store health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Cache store health check failed");
                ServiceHealth::unhealthy("ping failed")
            }
        }
    }

    async fn check_ledger(&self) -> ServiceHealth {
        let start = Instant::now();

        match self.ledger.ping().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Status ledger health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Status ledger health check failed");
                ServiceHealth::unhealthy("query failed")
            }
        }
    }

    async fn check_broker(broker: &RabbitMqConnection) -> ServiceHealth {
        if broker.is_connected().await {
            ServiceHealth::healthy(0)
        } else {
            warn!("RabbitMQ connection is not connected");
            ServiceHealth::unhealthy("not connected")
        }
    }

    fn check_circuit_breaker(breaker: &CircuitBreaker) -> ServiceHealth {
        let state = breaker.state();
        debug!(
            service = breaker.service_name(),
            circuit_state = state.as_str(),
            "Circuit breaker state checked"
        );

        let status = match state {
            CircuitState::Closed => HealthStatus::Healthy,
            CircuitState::HalfOpen | CircuitState::Open => HealthStatus::Degraded,
        };
        ServiceHealth::circuit(state.as_str(), status)
    }

    /// Unhealthy only when a critical dependency is down. Anything else that
    /// is not healthy degrades the result.
    fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
        let critical_unhealthy = checks
            .iter()
            .filter(|(name, _)| CRITICAL_CHECKS.contains(&name.as_str()))
            .any(|(_, health)| health.status == HealthStatus::Unhealthy);

        let has_problem = checks
            .values()
            .any(|health| health.status != HealthStatus::Healthy);

        if critical_unhealthy {
            HealthStatus::Unhealthy
        } else if has_problem {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
