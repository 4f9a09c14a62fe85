use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::models::response::ApiResponse;

/// External collaborators the admission path can fail on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    CacheStore,
    RateLimitStore,
    StatusLedger,
    UserService,
    TemplateService,
    MessageBroker,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dependency::CacheStore => "cache store",
            Dependency::RateLimitStore => "rate limit store",
            Dependency::StatusLedger => "status ledger",
            Dependency::UserService => "user service",
            Dependency::TemplateService => "template service",
            Dependency::MessageBroker => "message broker",
        }
    }

    fn failure_message(&self) -> &'static str {
        match self {
            Dependency::CacheStore => "failed to check idempotency",
            Dependency::RateLimitStore => "failed to check rate limit",
            Dependency::StatusLedger => "failed to access notification status",
            Dependency::UserService => "failed to get user preferences",
            Dependency::TemplateService => "failed to get template",
            Dependency::MessageBroker => "failed to publish message",
        }
    }
}

/// Failures surfaced to gateway callers.
///
/// `Display` output is what clients see, so variants never carry connection
/// strings or the underlying error chain. Callers log the source before
/// converting.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("service is unavailable")]
    CircuitOpen,

    #[error("{} unavailable", .dependency.as_str())]
    DependencyUnavailable { dependency: Dependency },

    #[error("request was already admitted but has no recorded status")]
    DuplicateWithoutStatus { request_id: String },

    #[error("notification not found")]
    NotFound,
}

impl GatewayError {
    pub fn dependency(dependency: Dependency) -> Self {
        GatewayError::DependencyUnavailable { dependency }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DependencyUnavailable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::DuplicateWithoutStatus { .. } => StatusCode::CONFLICT,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "validation failed",
            GatewayError::Unauthorized(_) => "unauthorized",
            GatewayError::RateLimited => "too many requests",
            GatewayError::CircuitOpen => "service temporarily unavailable",
            GatewayError::DependencyUnavailable { dependency } => dependency.failure_message(),
            GatewayError::DuplicateWithoutStatus { .. } => "duplicate request",
            GatewayError::NotFound => "notification not found",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()>::error(self.to_string(), self.message());
        (self.status_code(), Json(body)).into_response()
    }
}
