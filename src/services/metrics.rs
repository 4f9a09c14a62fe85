use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::models::metrics::MetricsSnapshot;

/// Process-wide request counters for the gateway's HTTP surface.
#[derive(Debug)]
pub struct RequestMetrics {
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    latency_micros_total: AtomicU64,
    started_at: Instant,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            latency_micros_total: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn record(&self, server_error: bool, latency: Duration) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if server_error {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros_total.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests_total = self.requests_total.load(Ordering::Relaxed);
        let latency = self.latency_micros_total.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests_total,
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            avg_latency_micros: latency.checked_div(requests_total).unwrap_or(0),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts every request that passes through, including gate rejections.
pub async fn track(
    State(metrics): State<Arc<RequestMetrics>>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let response = next.run(request).await;
    metrics.record(response.status().is_server_error(), started.elapsed());
    response
}
