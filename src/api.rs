use std::{net::SocketAddr, sync::Arc};

use anyhow::{Error, Result};
use axum::{
    Extension, Router,
    extract::{Path, Request, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::{
    clients::health::HealthChecker,
    error::GatewayError,
    models::{
        health::HealthStatus,
        metrics::MetricsSnapshot,
        request::SendRequest,
        response::{ApiResponse, SendAccepted},
        status::NotificationStatus,
    },
    services::{
        gates::{GateChain, enforce},
        metrics::{RequestMetrics, track},
        pipeline::{AdmissionPipeline, SendOutcome},
    },
    utils::shutdown_signal,
};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub struct AppState {
    pub pipeline: AdmissionPipeline,
    pub health_checker: HealthChecker,
    pub metrics: Arc<RequestMetrics>,
}

/// Correlation id of the current request, inbound or generated.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

pub fn create_router(state: Arc<AppState>, gates: Arc<GateChain>) -> Router {
    let v1 = Router::new()
        .route("/notifications/send", post(send_notification))
        .route("/notifications/{request_id}/status", get(get_status))
        .route_layer(middleware::from_fn_with_state(gates, enforce));

    let metrics = state.metrics.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_snapshot))
        .nest("/v1", v1)
        .layer(middleware::from_fn(correlation_id))
        .layer(middleware::from_fn_with_state(metrics, track))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    state: Arc<AppState>,
    gates: Arc<GateChain>,
    port: u16,
) -> Result<(), Error> {
    info!(gates = ?gates.names(), "Admission gates configured");

    let app = create_router(state, gates);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Notification gateway started");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Notification gateway stopped");
    Ok(())
}

async fn correlation_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(CorrelationId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

async fn send_notification(
    State(state): State<Arc<AppState>>,
    Extension(CorrelationId(correlation_id)): Extension<CorrelationId>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(request) = payload.map_err(|rejection| GatewayError::Validation(rejection.body_text()))?;

    let response = match state.pipeline.send(request, &correlation_id).await? {
        SendOutcome::Queued { request_id } => (
            StatusCode::ACCEPTED,
            Json(ApiResponse::success(
                SendAccepted {
                    request_id,
                    status: NotificationStatus::Queued.to_string(),
                },
                "notification queued",
            )),
        )
            .into_response(),
        SendOutcome::Duplicate(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(record, "duplicate request")),
        )
            .into_response(),
        SendOutcome::Skipped(record) => (
            StatusCode::OK,
            Json(ApiResponse::success(record, "user opted out")),
        )
            .into_response(),
    };

    Ok(response)
}

async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, GatewayError> {
    let record = state.pipeline.status(&request_id).await?;

    Ok(Json(ApiResponse::success(record, "notification status")))
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    let body = ApiResponse {
        success: status_code == StatusCode::OK,
        message: format!("service is {}", health_label(&health.status)),
        data: Some(health),
        error: None,
    };

    (status_code, Json(body))
}

async fn metrics_snapshot(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<MetricsSnapshot>> {
    Json(ApiResponse::success(
        state.metrics.snapshot(),
        "gateway metrics snapshot",
    ))
}

fn health_label(status: &HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    }
}
