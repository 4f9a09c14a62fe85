use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Failure share of the rolling window that trips the breaker.
    pub failure_ratio: f64,
    /// Outcomes required in the window before the ratio is considered.
    pub min_requests: u32,
    pub window_seconds: u64,
    /// How long the breaker stays open before admitting a probe.
    pub timeout_seconds: u64,
    /// Probe successes needed to close from half-open.
    pub success_threshold: u32,
}
