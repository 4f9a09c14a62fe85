pub mod channel;
pub mod circuit_breaker;
pub mod envelope;
pub mod fcm;
pub mod health;
pub mod metrics;
pub mod preferences;
pub mod request;
pub mod response;
pub mod retry;
pub mod status;
pub mod template;
