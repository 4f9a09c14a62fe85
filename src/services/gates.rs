//! Ordered admission gates for the `/v1` routes.
//!
//! Each gate may answer the request itself. The chain runs them in the order
//! given by `ADMISSION_GATES`; a circuit-breaker gate wraps everything after
//! it, including the handler, and judges the outcome by its status code.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use crate::{
    clients::circuit_breaker::{Admission, CircuitBreaker},
    config::Config,
    error::{Dependency, GatewayError},
    store::CacheStore,
};

const FORWARDED_FOR: &str = "x-forwarded-for";

pub enum AdmissionGate {
    /// Bearer token check. An empty token list accepts any non-empty token.
    Auth { tokens: Vec<String> },
    /// Fixed-window request counter per client address.
    RateLimit {
        cache: Arc<dyn CacheStore>,
        limit: u64,
        window: Duration,
    },
    CircuitBreaker(Arc<CircuitBreaker>),
}

impl AdmissionGate {
    pub fn name(&self) -> &'static str {
        match self {
            AdmissionGate::Auth { .. } => "auth",
            AdmissionGate::RateLimit { .. } => "rate_limit",
            AdmissionGate::CircuitBreaker(_) => "circuit_breaker",
        }
    }
}

/// Returns the breaker slot if the response future is dropped before an
/// outcome is known, so a cancelled probe cannot wedge the breaker half-open.
struct BreakerSlot {
    breaker: Arc<CircuitBreaker>,
    admission: Option<Admission>,
}

impl BreakerSlot {
    fn finish(mut self, success: bool) {
        if let Some(admission) = self.admission.take() {
            self.breaker.record(admission, success);
        }
    }
}

impl Drop for BreakerSlot {
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take()
            && admission.is_probe()
        {
            self.breaker.record(admission, false);
        }
    }
}

#[derive(Default)]
pub struct GateChain {
    gates: Vec<AdmissionGate>,
}

impl GateChain {
    pub fn new(gates: Vec<AdmissionGate>) -> Self {
        Self { gates }
    }

    /// Builds the chain named by `ADMISSION_GATES`. Unknown names are an
    /// error so a typo cannot silently disable a gate.
    pub fn from_config(
        config: &Config,
        cache: Arc<dyn CacheStore>,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, Error> {
        let gates = config
            .admission_gates
            .iter()
            .map(|name| match name.trim() {
                "auth" => Ok(AdmissionGate::Auth {
                    tokens: config.api_tokens.clone(),
                }),
                "rate_limit" => Ok(AdmissionGate::RateLimit {
                    cache: cache.clone(),
                    limit: config.rate_limit_requests,
                    window: config.rate_limit_window(),
                }),
                "circuit_breaker" => Ok(AdmissionGate::CircuitBreaker(breaker.clone())),
                other => Err(anyhow!("Unknown admission gate '{}' in ADMISSION_GATES", other)),
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self::new(gates))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.gates.iter().map(AdmissionGate::name).collect()
    }

    async fn check(
        &self,
        gate: &AdmissionGate,
        headers: &HeaderMap,
        client: &str,
    ) -> Result<(), GatewayError> {
        match gate {
            AdmissionGate::Auth { tokens } => check_bearer(headers, tokens),
            AdmissionGate::RateLimit {
                cache,
                limit,
                window,
            } => {
                let key = format!("rate_limit:{}", client);

                let count = cache.increment(&key, *window).await.map_err(|e| {
                    error!(error = %e, "Rate limit counter unavailable");
                    GatewayError::dependency(Dependency::RateLimitStore)
                })?;

                if count > *limit {
                    warn!(client = %client, count, limit, "Rate limit exceeded");
                    return Err(GatewayError::RateLimited);
                }
                Ok(())
            }
            // Handled around the handler in `enforce`.
            AdmissionGate::CircuitBreaker(_) => Ok(()),
        }
    }
}

/// Axum middleware running the chain in order.
pub async fn enforce(State(chain): State<Arc<GateChain>>, request: Request, next: Next) -> Response {
    let client = client_address(&request);
    let mut slots = Vec::new();

    for gate in &chain.gates {
        if let AdmissionGate::CircuitBreaker(breaker) = gate {
            let Some(admission) = breaker.try_acquire() else {
                warn!(service = breaker.service_name(), "Circuit breaker open, rejecting request");
                return finish(slots, GatewayError::CircuitOpen.into_response());
            };
            slots.push(BreakerSlot {
                breaker: breaker.clone(),
                admission: Some(admission),
            });
            continue;
        }

        if let Err(rejection) = chain.check(gate, request.headers(), &client).await {
            return finish(slots, rejection.into_response());
        }
    }

    let response = next.run(request).await;
    finish(slots, response)
}

fn finish(slots: Vec<BreakerSlot>, response: Response) -> Response {
    let success = !response.status().is_server_error();
    for slot in slots {
        slot.finish(success);
    }
    response
}

fn check_bearer(headers: &HeaderMap, tokens: &[String]) -> Result<(), GatewayError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| GatewayError::Unauthorized("missing bearer token".to_string()))?;

    if !tokens.is_empty() && !tokens.iter().any(|allowed| allowed == token) {
        return Err(GatewayError::Unauthorized("invalid token".to_string()));
    }

    Ok(())
}

/// First `X-Forwarded-For` hop, else the peer address.
fn client_address(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
    {
        return forwarded.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
