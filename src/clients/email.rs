use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    models::{envelope::MessageEnvelope, template::RenderedTemplate},
    worker::provider::{DeliveryError, DeliveryProvider},
};

#[derive(Debug, Serialize)]
struct SendEmailRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Email delivery through a transactional email HTTP API
/// (`POST {api_url}/emails`, bearer key).
pub struct EmailApiClient {
    http_client: Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl EmailApiClient {
    pub fn new(api_url: &str, api_key: &str, from: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!("Email API client initialized");

        Ok(Self {
            http_client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl DeliveryProvider for EmailApiClient {
    fn name(&self) -> &str {
        "email_api"
    }

    async fn deliver(
        &self,
        envelope: &MessageEnvelope,
        rendered: &RenderedTemplate,
    ) -> Result<String, DeliveryError> {
        let recipient = envelope.user.email.trim();
        if recipient.is_empty() {
            return Err(DeliveryError::Permanent(
                "user has no email address".to_string(),
            ));
        }

        let from = envelope
            .provider_overrides
            .get("from")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.from);
        let reply_to = envelope
            .provider_overrides
            .get("reply_to")
            .and_then(|v| v.as_str());

        let request = SendEmailRequest {
            from,
            to: vec![recipient],
            subject: &rendered.subject,
            html: &rendered.body,
            reply_to,
        };

        debug!(request_id = %envelope.request_id, "Sending email");

        let response = self
            .http_client
            .post(format!("{}/emails", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(DeliveryError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::from_status(status, &body));
        }

        let detail = match response.json::<SendEmailResponse>().await {
            Ok(SendEmailResponse { id: Some(id) }) => format!("accepted as {}", id),
            _ => "accepted".to_string(),
        };

        Ok(detail)
    }
}
