use std::sync::Arc;

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, StatusCode, header::CONTENT_TYPE},
};
use notification_gateway::{
    api::{CORRELATION_ID_HEADER, create_router},
    services::gates::GateChain,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::common::Harness;

fn router(harness: &Harness) -> Router {
    create_router(harness.app_state(), Arc::new(GateChain::default()))
}

fn post_send(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/notifications/send")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response<Body>) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn send_body(request_id: &str) -> Value {
    json!({
        "request_id": request_id,
        "user_id": "u-1",
        "channel": "email",
        "template_slug": "welcome",
        "variables": {"name": "Ada"}
    })
}

/// Test: Accepted sends answer 202 and replays answer 200 with the ledger row
#[tokio::test]
async fn test_send_accepted_then_duplicate() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_user("u-1", true, true).await;
    harness.mount_template("welcome").await;
    let app = router(&harness);

    let response = app.clone().oneshot(post_send(send_body("A1"))).await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["request_id"], "A1");
    assert_eq!(body["data"]["status"], "queued");

    let response = app.oneshot(post_send(send_body("A1"))).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["data"]["status"], "queued");
    assert!(body["data"]["updated_at"].is_string());

    assert_eq!(harness.publisher.published_count(), 1);
    Ok(())
}

/// Test: Opt-out answers 200 with status skipped
#[tokio::test]
async fn test_opt_out_answers_skipped() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_user("u-1", false, true).await;
    let app = router(&harness);

    let response = app.oneshot(post_send(send_body("A2"))).await?;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["data"]["status"], "skipped");
    assert_eq!(body["data"]["detail"], "user opted out");
    assert_eq!(harness.publisher.published_count(), 0);
    Ok(())
}

/// Test: Malformed JSON is a 400 in the uniform envelope
#[tokio::test]
async fn test_malformed_body_is_validation_error() -> Result<()> {
    let harness = Harness::start().await?;
    let app = router(&harness);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/notifications/send")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{ nope"))?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "validation failed");
    assert!(body["error"].is_string());
    Ok(())
}

/// Test: Missing channel after alias normalization is a 400
#[tokio::test]
async fn test_missing_channel_is_rejected() -> Result<()> {
    let harness = Harness::start().await?;
    let app = router(&harness);

    let response = app
        .oneshot(post_send(json!({
            "request_id": "A3",
            "user_id": "u-1",
            "template_slug": "welcome"
        })))
        .await?;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert_eq!(body["error"], "channel or notification_type is required");
    Ok(())
}

/// Test: Template failure is a 500 that names the dependency only
#[tokio::test]
async fn test_template_failure_is_internal_error() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_user("u-1", true, true).await;
    let template_uri = harness.template_service.uri();
    let app = router(&harness);

    let response = app.oneshot(post_send(send_body("A4"))).await?;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await?;
    assert_eq!(body["error"], "template service unavailable");
    assert!(!body.to_string().contains(&template_uri));
    Ok(())
}

/// Test: Status lookup returns the ledger row or 404
#[tokio::test]
async fn test_status_lookup() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_user("u-1", true, true).await;
    harness.mount_template("welcome").await;
    let app = router(&harness);

    app.clone().oneshot(post_send(send_body("A5"))).await?;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/v1/notifications/A5/status")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["data"]["request_id"], "A5");
    assert_eq!(body["data"]["status"], "queued");
    assert_eq!(body["data"]["provider"], "");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/notifications/unknown/status")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await?["success"], false);
    Ok(())
}

/// Test: Correlation ids are echoed or generated
#[tokio::test]
async fn test_correlation_id_is_propagated() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_user("u-1", true, true).await;
    harness.mount_template("welcome").await;
    let app = router(&harness);

    let mut request = post_send(send_body("A6"));
    request
        .headers_mut()
        .insert(CORRELATION_ID_HEADER, "trace-42".parse()?);
    let response = app.clone().oneshot(request).await?;

    assert_eq!(response.headers()[CORRELATION_ID_HEADER], "trace-42");
    assert_eq!(harness.publisher.published.lock()[0].correlation_id, "trace-42");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    let generated = response.headers()[CORRELATION_ID_HEADER].to_str()?;
    assert!(uuid::Uuid::parse_str(generated).is_ok());
    Ok(())
}

/// Test: Health reports per-dependency checks and 503 when the ledger is down
#[tokio::test]
async fn test_health_reflects_dependencies() -> Result<()> {
    let harness = Harness::start().await?;
    let app = router(&harness);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["checks"]["cache_store"]["status"], "healthy");

    harness.ledger.set_available(false);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["status"], "unhealthy");
    Ok(())
}

/// Test: Metrics count every request and the 5xx answers among them
#[tokio::test]
async fn test_metrics_snapshot_counts_requests() -> Result<()> {
    let harness = Harness::start().await?;
    harness.mount_user("u-1", true, true).await;
    harness.mount_template("welcome").await;
    let app = router(&harness);

    let response = app.clone().oneshot(post_send(send_body("M1"))).await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut unknown_template = send_body("M2");
    unknown_template["template_slug"] = json!("missing");
    let response = app.clone().oneshot(post_send(unknown_template)).await?;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["requests_total"], 2);
    assert_eq!(body["data"]["requests_failed"], 1);
    assert!(body["data"]["uptime_seconds"].is_u64());
    Ok(())
}
