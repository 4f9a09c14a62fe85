//! Consumer side of the dispatch pipeline.
//!
//! A [`ChannelWorker`] takes one envelope through
//! `processing -> sent | failed -> retrying | dead_lettered`, recording each
//! step in the ledger with a fresh timestamp so that a stale redelivery can
//! never overwrite a newer outcome.

pub mod provider;
pub mod runner;

use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        circuit_breaker::CircuitBreaker, publisher::RetryPublisher, template::render_template,
    },
    models::{
        channel::Channel,
        envelope::{DeadLetterMessage, MessageEnvelope},
        retry::RetryConfig,
        status::{NotificationStatus, StatusRecord},
    },
    store::StatusLedger,
};

use self::provider::{DeliveryError, DeliveryProvider};

/// What happened to one delivery. Every variant is safe to ack.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Sent,
    Retrying { retry_count: u32, delay: Duration },
    DeadLettered { reason: String },
    /// Redelivery of a request whose row is already terminal.
    AlreadyHandled(NotificationStatus),
}

pub struct ChannelWorker {
    channel: Channel,
    provider: Arc<dyn DeliveryProvider>,
    ledger: Arc<dyn StatusLedger>,
    publisher: Arc<dyn RetryPublisher>,
    retry: RetryConfig,
    breaker: CircuitBreaker,
}

impl ChannelWorker {
    pub fn new(
        channel: Channel,
        provider: Arc<dyn DeliveryProvider>,
        ledger: Arc<dyn StatusLedger>,
        publisher: Arc<dyn RetryPublisher>,
        retry: RetryConfig,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            channel,
            provider,
            ledger,
            publisher,
            retry,
            breaker,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Decodes a raw queue payload and handles it. A payload that is not an
    /// envelope goes to the dead-letter queue unchanged.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<Outcome, Error> {
        match serde_json::from_slice::<MessageEnvelope>(payload) {
            Ok(envelope) => self.handle(envelope).await,
            Err(e) => {
                let reason = format!("undecodable payload: {}", e);
                warn!(channel = %self.channel, error = %e, "Dead-lettering undecodable payload");

                let original_message = serde_json::from_slice::<JsonValue>(payload).unwrap_or_else(
                    |_| JsonValue::String(String::from_utf8_lossy(payload).into_owned()),
                );
                self.publisher
                    .publish_dead_letter(&dead_letter(original_message, &reason))
                    .await?;

                Ok(Outcome::DeadLettered { reason })
            }
        }
    }

    /// Runs the delivery state machine for one envelope. `Err` means a write
    /// failed before any copy was republished and the delivery should be
    /// requeued.
    pub async fn handle(&self, envelope: MessageEnvelope) -> Result<Outcome, Error> {
        let request_id = envelope.request_id.clone();

        if let Some(existing) = self.ledger.get(&request_id).await?
            && matches!(
                existing.status,
                NotificationStatus::Sent | NotificationStatus::DeadLettered
            )
        {
            info!(
                request_id = %request_id,
                status = %existing.status,
                "Request already finished, skipping redelivery"
            );
            return Ok(Outcome::AlreadyHandled(existing.status));
        }

        self.ledger
            .upsert(
                &StatusRecord::new(&request_id, NotificationStatus::Processing)
                    .with_provider(self.provider.name())
                    .with_detail(format!("attempt {}", envelope.retry_count + 1)),
            )
            .await?;

        debug!(
            request_id = %request_id,
            retry_count = envelope.retry_count,
            "Processing notification"
        );

        let error = match self.attempt(&envelope).await {
            Ok(detail) => {
                self.ledger
                    .upsert(
                        &StatusRecord::new(&request_id, NotificationStatus::Sent)
                            .with_provider(self.provider.name())
                            .with_detail(detail),
                    )
                    .await?;

                info!(request_id = %request_id, provider = self.provider.name(), "Notification sent");
                return Ok(Outcome::Sent);
            }
            Err(error) => error,
        };

        self.ledger
            .upsert(
                &StatusRecord::new(&request_id, NotificationStatus::Failed)
                    .with_provider(self.provider.name())
                    .with_detail(error.to_string()),
            )
            .await?;

        if error.is_transient() && envelope.retry_count < self.retry.max_attempts {
            self.schedule_retry(&envelope, &error).await
        } else {
            self.dead_letter(&envelope, &error).await
        }
    }

    async fn attempt(&self, envelope: &MessageEnvelope) -> Result<String, DeliveryError> {
        if envelope.channel != self.channel {
            return Err(DeliveryError::Permanent(format!(
                "envelope for channel {} reached the {} worker",
                envelope.channel, self.channel
            )));
        }

        let rendered = render_template(&envelope.template, &envelope.variables)
            .map_err(|e| DeliveryError::Permanent(format!("template render failed: {}", e)))?;

        let Some(admission) = self.breaker.try_acquire() else {
            return Err(DeliveryError::Transient(format!(
                "circuit breaker open for {}",
                self.breaker.service_name()
            )));
        };

        let result = self.provider.deliver(envelope, &rendered).await;

        // Permanent failures say nothing about provider health.
        let healthy = !matches!(result, Err(DeliveryError::Transient(_)));
        self.breaker.record(admission, healthy);

        result
    }

    async fn schedule_retry(
        &self,
        envelope: &MessageEnvelope,
        error: &DeliveryError,
    ) -> Result<Outcome, Error> {
        let next = envelope.next_attempt();
        let delay = self.retry.delay_for(next.retry_count);

        // Stamp before republishing so the retried attempt always writes later.
        let record = StatusRecord::new(&next.request_id, NotificationStatus::Retrying)
            .with_provider(self.provider.name())
            .with_detail(format!(
                "retry {}/{}: {}",
                next.retry_count, self.retry.max_attempts, error
            ));

        self.publisher.publish_retry(&next, delay).await?;
        self.record_after_republish(&record).await;

        warn!(
            request_id = %next.request_id,
            retry_count = next.retry_count,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Delivery failed, retry scheduled"
        );

        Ok(Outcome::Retrying {
            retry_count: next.retry_count,
            delay,
        })
    }

    async fn dead_letter(
        &self,
        envelope: &MessageEnvelope,
        error: &DeliveryError,
    ) -> Result<Outcome, Error> {
        let reason = if error.is_transient() {
            format!("retries exhausted after {} attempts: {}", envelope.retry_count + 1, error)
        } else {
            error.to_string()
        };

        let original_message = serde_json::to_value(envelope)
            .map_err(|e| anyhow!("Failed to serialize envelope: {}", e))?;
        self.publisher
            .publish_dead_letter(&dead_letter(original_message, &reason))
            .await?;

        self.record_after_republish(
            &StatusRecord::new(&envelope.request_id, NotificationStatus::DeadLettered)
                .with_provider(self.provider.name())
                .with_detail(&reason),
        )
        .await;

        error!(request_id = %envelope.request_id, reason = %reason, "Notification dead-lettered");

        Ok(Outcome::DeadLettered { reason })
    }

    /// Ledger write for a message that already has a copy on the broker.
    /// Failures are logged, never returned; the row keeps `failed` until a
    /// later write replaces it.
    async fn record_after_republish(&self, record: &StatusRecord) {
        if let Err(e) = self.ledger.upsert(record).await {
            warn!(
                request_id = %record.request_id,
                status = %record.status,
                error = %e,
                "Failed to record status after republish"
            );
        }
    }
}

fn dead_letter(original_message: JsonValue, reason: &str) -> DeadLetterMessage {
    DeadLetterMessage {
        original_message,
        failure_reason: reason.to_string(),
        failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}
