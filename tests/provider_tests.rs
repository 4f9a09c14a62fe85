use std::time::Duration;

use anyhow::Result;
use notification_gateway::{
    clients::email::EmailApiClient,
    models::{channel::Channel, template::RenderedTemplate},
    worker::provider::{DeliveryError, DeliveryProvider},
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

use crate::common::envelope;

fn rendered() -> RenderedTemplate {
    RenderedTemplate {
        subject: "Welcome Ada".to_string(),
        body: "Hello Ada".to_string(),
    }
}

async fn client(server: &MockServer) -> Result<EmailApiClient> {
    EmailApiClient::new(
        &server.uri(),
        "email-key",
        "noreply@example.com",
        Duration::from_secs(2),
    )
}

/// Test: Email delivery posts the rendered message with the bearer key
#[tokio::test]
async fn test_email_delivery_success() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/emails"))
        .and(header("authorization", "Bearer email-key"))
        .and(body_partial_json(json!({
            "from": "noreply@example.com",
            "to": ["ada@example.com"],
            "subject": "Welcome Ada"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "msg-7"})))
        .expect(1)
        .mount(&server)
        .await;

    let detail = client(&server)
        .await?
        .deliver(&envelope("E1", Channel::Email), &rendered())
        .await?;

    assert_eq!(detail, "accepted as msg-7");
    Ok(())
}

/// Test: Rejected input is permanent, throttling is transient
#[tokio::test]
async fn test_email_failure_classification() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("invalid recipient"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = client(&server).await?;

    let first = client
        .deliver(&envelope("E2", Channel::Email), &rendered())
        .await
        .unwrap_err();
    assert!(matches!(first, DeliveryError::Permanent(_)));
    assert!(first.to_string().contains("invalid recipient"));

    let second = client
        .deliver(&envelope("E2", Channel::Email), &rendered())
        .await
        .unwrap_err();
    assert!(second.is_transient());
    Ok(())
}

/// Test: A user without an address fails without calling the provider
#[tokio::test]
async fn test_missing_address_is_permanent() -> Result<()> {
    let server = MockServer::start().await;
    let mut envelope = envelope("E3", Channel::Email);
    envelope.user.email.clear();

    let err = client(&server)
        .await?
        .deliver(&envelope, &rendered())
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Permanent(_)));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}
