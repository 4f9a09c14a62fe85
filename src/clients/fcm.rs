use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::Client;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    models::{
        envelope::MessageEnvelope,
        fcm::{FcmMessage, FcmNotification, FcmRequest},
        template::RenderedTemplate,
    },
    worker::provider::{DeliveryError, DeliveryProvider},
};

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Push delivery through the FCM HTTP v1 API.
pub struct FcmClient {
    http_client: Client,
    fcm_project_id: String,
    token_provider: OnceCell<Arc<dyn TokenProvider>>,
}

impl FcmClient {
    pub fn new(fcm_project_id: &str, timeout: Duration) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|_| anyhow!("Failed to create HTTP client"))?;

        info!(project_id = %fcm_project_id, "FCM client initialized");

        Ok(Self {
            http_client,
            fcm_project_id: fcm_project_id.to_string(),
            token_provider: OnceCell::new(),
        })
    }

    pub fn build_request(
        device_token: &str,
        rendered: &RenderedTemplate,
        envelope: &MessageEnvelope,
    ) -> FcmRequest {
        let mut data = HashMap::new();
        data.insert("request_id".to_string(), envelope.request_id.clone());
        data.insert(
            "correlation_id".to_string(),
            envelope.correlation_id.clone(),
        );

        for (key, value) in &envelope.provider_overrides {
            if let Some(value) = value.as_str() {
                data.insert(key.clone(), value.to_string());
            }
        }

        FcmRequest {
            message: FcmMessage {
                token: device_token.to_string(),
                notification: FcmNotification {
                    title: rendered.subject.clone(),
                    body: rendered.body.clone(),
                },
                data: Some(data),
            },
        }
    }

    async fn access_token(&self) -> Result<String, DeliveryError> {
        let provider = self
            .token_provider
            .get_or_try_init(|| async { gcp_auth::provider().await })
            .await
            .map_err(|e| DeliveryError::Transient(format!("FCM auth unavailable: {}", e)))?;

        let token = provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| DeliveryError::Transient(format!("FCM token refresh failed: {}", e)))?;

        Ok(token.as_str().to_string())
    }

    async fn send_once(&self, access_token: &str, request: &FcmRequest) -> Result<(), DeliveryError> {
        let url = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.fcm_project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await
            .map_err(DeliveryError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::from_status(status, &body))
    }
}

#[async_trait]
impl DeliveryProvider for FcmClient {
    fn name(&self) -> &str {
        "fcm"
    }

    async fn deliver(
        &self,
        envelope: &MessageEnvelope,
        rendered: &RenderedTemplate,
    ) -> Result<String, DeliveryError> {
        let tokens = &envelope.user.push_tokens;
        if tokens.is_empty() {
            return Err(DeliveryError::Permanent(
                "user has no registered push tokens".to_string(),
            ));
        }

        let access_token = self.access_token().await?;

        let mut delivered = 0;
        let mut last_error = None;

        for push_token in tokens {
            debug!(
                request_id = %envelope.request_id,
                platform = %push_token.platform,
                "Sending FCM push notification"
            );

            let request = Self::build_request(&push_token.token, rendered, envelope);
            match self.send_once(&access_token, &request).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        request_id = %envelope.request_id,
                        platform = %push_token.platform,
                        error = %e,
                        "FCM delivery to device failed"
                    );
                    // A transient failure on any device outranks permanent ones.
                    if e.is_transient() || last_error.is_none() {
                        last_error = Some(e);
                    }
                }
            }
        }

        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(format!("delivered to {}/{} devices", delivered, tokens.len())),
        }
    }
}
