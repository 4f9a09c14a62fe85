use std::{
    collections::VecDeque,
    future::Future,
    time::{Duration, Instant},
};

use anyhow::{Error, Result, anyhow};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::models::circuit_breaker::{CircuitBreakerConfig, CircuitState};

#[derive(Debug)]
struct BreakerData {
    state: CircuitState,
    /// Outcomes observed while closed, oldest first. `true` is a failure.
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    probe_successes: u32,
}

/// Permission to run one protected call. Hand it back through
/// [`CircuitBreaker::record`] once the outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    probe: bool,
}

impl Admission {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Failure-rate circuit breaker.
///
/// Closed, it keeps a rolling window of outcomes and opens once the window
/// holds at least `min_requests` outcomes and the failure share reaches
/// `failure_ratio`. Open, it rejects without running anything until
/// `timeout_seconds` have passed. Half-open, it lets one probe through at a
/// time: `success_threshold` probe successes close it, a probe failure opens
/// it again.
#[derive(Debug)]
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    data: Mutex<BreakerData>,
}

impl CircuitBreaker {
    pub fn new(service_name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let service_name = service_name.into();
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            config,
            data: Mutex::new(BreakerData {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
                probe_successes: 0,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Current state. An open breaker whose timeout has elapsed reports
    /// half-open.
    pub fn state(&self) -> CircuitState {
        let data = self.data.lock();
        match data.state {
            CircuitState::Open if self.timeout_elapsed(&data) => CircuitState::HalfOpen,
            state => state,
        }
    }

    /// Decides whether a call may proceed. `None` means reject now.
    pub fn try_acquire(&self) -> Option<Admission> {
        let mut data = self.data.lock();

        match data.state {
            CircuitState::Closed => Some(Admission { probe: false }),
            CircuitState::Open => {
                if !self.timeout_elapsed(&data) {
                    return None;
                }
                info!(service = %self.service_name, "Circuit breaker attempting reset");
                data.state = CircuitState::HalfOpen;
                data.probe_successes = 0;
                data.probe_in_flight = true;
                Some(Admission { probe: true })
            }
            CircuitState::HalfOpen => {
                if data.probe_in_flight {
                    return None;
                }
                debug!(service = %self.service_name, "Circuit breaker admitting probe");
                data.probe_in_flight = true;
                Some(Admission { probe: true })
            }
        }
    }

    pub fn record(&self, admission: Admission, success: bool) {
        let mut data = self.data.lock();

        if admission.probe {
            data.probe_in_flight = false;
            if data.state != CircuitState::HalfOpen {
                return;
            }

            if success {
                data.probe_successes += 1;
                if data.probe_successes >= self.config.success_threshold {
                    data.state = CircuitState::Closed;
                    data.window.clear();
                    data.opened_at = None;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            } else {
                self.open(&mut data);
                warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            }
            return;
        }

        if data.state != CircuitState::Closed {
            return;
        }

        let now = Instant::now();
        data.window.push_back((now, !success));
        self.evict_expired(&mut data, now);

        let total = data.window.len() as u32;
        let failures = data.window.iter().filter(|(_, failed)| *failed).count() as u32;

        if total >= self.config.min_requests.max(1)
            && f64::from(failures) / f64::from(total) >= self.config.failure_ratio
        {
            self.open(&mut data);
            warn!(
                service = %self.service_name,
                failures,
                total,
                "Circuit breaker opened due to failure rate"
            );
        }
    }

    /// Runs `operation` under the breaker. An open breaker fails without
    /// calling it.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let Some(admission) = self.try_acquire() else {
            warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
            return Err(anyhow!("Circuit breaker is open for {}", self.service_name));
        };

        let result = operation().await;
        self.record(admission, result.is_ok());
        result
    }

    fn open(&self, data: &mut BreakerData) {
        data.state = CircuitState::Open;
        data.opened_at = Some(Instant::now());
        data.window.clear();
        data.probe_successes = 0;
    }

    fn timeout_elapsed(&self, data: &BreakerData) -> bool {
        data.opened_at.is_some_and(|opened_at| {
            opened_at.elapsed() >= Duration::from_secs(self.config.timeout_seconds)
        })
    }

    fn evict_expired(&self, data: &mut BreakerData, now: Instant) {
        let window = Duration::from_secs(self.config.window_seconds);
        while data
            .window
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > window)
        {
            data.window.pop_front();
        }
    }
}
