use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

impl RetryConfig {
    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn base_delay_ms(&self, retry: u32) -> u64 {
        let exponent = retry.saturating_sub(1);
        let factor = self.backoff_multiplier.saturating_pow(exponent);

        self.initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Delay before retry number `retry` with ±10% jitter applied.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_ms(retry);
        let jitter = rand::random_range(-0.1..=0.1);

        Duration::from_millis((base as f64 * (1.0 + jitter)) as u64)
    }
}
