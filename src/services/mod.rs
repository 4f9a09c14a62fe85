pub mod gates;
pub mod idempotency;
pub mod metrics;
pub mod opt_out;
pub mod pipeline;
