use chrono::{DateTime, Utc};
use serde::Serialize;

/// Point-in-time view of the gateway's request counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    /// Requests answered with a 5xx status.
    pub requests_failed: u64,
    pub avg_latency_micros: u64,
    pub uptime_seconds: u64,
    pub timestamp: DateTime<Utc>,
}
