use std::{sync::Arc, time::Duration};

use tracing::{error, info, warn};

use crate::{
    clients::{publisher::EnvelopePublisher, template::TemplateSource, user::PreferenceSource},
    error::{Dependency, GatewayError},
    models::{
        envelope::MessageEnvelope,
        request::SendRequest,
        status::{NotificationStatus, StatusRecord},
    },
    services::{
        idempotency::{Admission, IdempotencyGate},
        opt_out::{OPT_OUT_DETAIL, should_skip},
    },
    store::{CacheStore, StatusLedger},
};

/// What the pipeline did with an admitted request.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Queued { request_id: String },
    Duplicate(StatusRecord),
    Skipped(StatusRecord),
}

/// The send path: validate, admit once, resolve preferences, filter
/// opt-outs, resolve the template, publish, then record `queued`.
///
/// Every step fails fast. A failed publish never reaches the ledger, so a
/// client retry of the same id surfaces as a duplicate without status rather
/// than a second publish.
pub struct AdmissionPipeline {
    idempotency: IdempotencyGate,
    ledger: Arc<dyn StatusLedger>,
    preferences: Arc<dyn PreferenceSource>,
    templates: Arc<dyn TemplateSource>,
    publisher: Arc<dyn EnvelopePublisher>,
}

impl AdmissionPipeline {
    pub fn new(
        cache: Arc<dyn CacheStore>,
        ledger: Arc<dyn StatusLedger>,
        preferences: Arc<dyn PreferenceSource>,
        templates: Arc<dyn TemplateSource>,
        publisher: Arc<dyn EnvelopePublisher>,
        idempotency_ttl: Duration,
    ) -> Self {
        Self {
            idempotency: IdempotencyGate::new(cache, ledger.clone(), idempotency_ttl),
            ledger,
            preferences,
            templates,
            publisher,
        }
    }

    pub async fn send(
        &self,
        request: SendRequest,
        correlation_id: &str,
    ) -> Result<SendOutcome, GatewayError> {
        let request = request.normalize().map_err(GatewayError::Validation)?;
        let request_id = request.request_id.clone();

        if let Admission::Duplicate(record) = self.idempotency.admit(&request_id).await? {
            return Ok(SendOutcome::Duplicate(record));
        }

        let preferences = self
            .preferences
            .get_preferences(&request.user_id)
            .await
            .map_err(|e| {
                error!(
                    request_id = %request_id,
                    user_id = %request.user_id,
                    error = %e,
                    "Failed to get user preferences"
                );
                GatewayError::dependency(Dependency::UserService)
            })?;

        if should_skip(request.channel, &preferences) {
            let record = StatusRecord::new(&request_id, NotificationStatus::Skipped)
                .with_detail(OPT_OUT_DETAIL);
            self.write_status(&record).await?;

            info!(
                request_id = %request_id,
                channel = %request.channel,
                "User opted out, notification skipped"
            );
            return Ok(SendOutcome::Skipped(record));
        }

        let locale = Some(preferences.locale.as_str()).filter(|l| !l.is_empty());
        let template = self
            .templates
            .get_template(&request.template_slug, locale)
            .await
            .map_err(|e| {
                error!(
                    request_id = %request_id,
                    template_slug = %request.template_slug,
                    error = %e,
                    "Failed to get template"
                );
                GatewayError::dependency(Dependency::TemplateService)
            })?;

        let envelope =
            MessageEnvelope::build(request, correlation_id.to_string(), preferences, template);

        self.publisher.publish(&envelope).await.map_err(|e| {
            error!(request_id = %request_id, error = %e, "Failed to publish message");
            GatewayError::dependency(Dependency::MessageBroker)
        })?;

        let record = StatusRecord::new(&request_id, NotificationStatus::Queued);
        if let Err(e) = self.ledger.upsert(&record).await {
            // The envelope is already in flight; its consumer will overwrite
            // the row.
            warn!(
                request_id = %request_id,
                error = %e,
                "Published but failed to record queued status"
            );
        }

        info!(
            request_id = %request_id,
            channel = %envelope.channel,
            correlation_id = %envelope.correlation_id,
            "Notification queued"
        );

        Ok(SendOutcome::Queued { request_id })
    }

    pub async fn status(&self, request_id: &str) -> Result<StatusRecord, GatewayError> {
        self.ledger
            .get(request_id)
            .await
            .map_err(|e| {
                error!(request_id, error = %e, "Failed to read notification status");
                GatewayError::dependency(Dependency::StatusLedger)
            })?
            .ok_or(GatewayError::NotFound)
    }

    async fn write_status(&self, record: &StatusRecord) -> Result<(), GatewayError> {
        self.ledger.upsert(record).await.map_err(|e| {
            error!(
                request_id = %record.request_id,
                status = %record.status,
                error = %e,
                "Failed to write notification status"
            );
            GatewayError::dependency(Dependency::StatusLedger)
        })
    }
}
