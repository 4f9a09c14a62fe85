use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel,
    options::{BasicPublishOptions, ConfirmSelectOptions},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    clients::rbmq::RabbitMqConnection,
    models::envelope::{DeadLetterMessage, MessageEnvelope},
};

/// Hands an envelope to the broker for its channel's queue.
#[async_trait]
pub trait EnvelopePublisher: Send + Sync {
    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), Error>;
}

/// Republish paths a channel worker needs besides the normal route.
#[async_trait]
pub trait RetryPublisher: Send + Sync {
    /// Parks the envelope in its channel's retry queue for `delay`, after
    /// which the broker routes it back to the channel queue.
    async fn publish_retry(&self, envelope: &MessageEnvelope, delay: Duration)
    -> Result<(), Error>;

    async fn publish_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), Error>;
}

/// AMQP publisher. Publishes are persistent and confirmed; a nack or a
/// broken channel is returned to the caller and never retried here.
pub struct AmqpPublisher {
    connection: Arc<RabbitMqConnection>,
    exchange: String,
    dead_letter_queue: String,
    channel: Mutex<Option<Channel>>,
}

impl AmqpPublisher {
    pub fn new(
        connection: Arc<RabbitMqConnection>,
        exchange: String,
        dead_letter_queue: String,
    ) -> Self {
        Self {
            connection,
            exchange,
            dead_letter_queue,
            channel: Mutex::new(None),
        }
    }

    async fn channel(&self) -> Result<Channel, Error> {
        let mut cached = self.channel.lock().await;

        if let Some(channel) = cached.as_ref()
            && channel.status().connected()
        {
            return Ok(channel.clone());
        }

        let channel = self.connection.create_channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to enable publisher confirms"))?;

        info!("Publisher channel opened");
        *cached = Some(channel.clone());
        Ok(channel)
    }

    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), Error> {
        let channel = self.channel().await?;

        let confirmation = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?
            .await
            .map_err(|e| anyhow!("Failed to confirm publish: {}", e))?;

        if confirmation.is_nack() {
            return Err(anyhow!("Broker rejected published message"));
        }

        Ok(())
    }

    fn envelope_properties(envelope: &MessageEnvelope) -> BasicProperties {
        BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2)
            .with_message_id(envelope.request_id.clone().into())
            .with_correlation_id(envelope.correlation_id.clone().into())
    }
}

#[async_trait]
impl EnvelopePublisher for AmqpPublisher {
    async fn publish(&self, envelope: &MessageEnvelope) -> Result<(), Error> {
        let payload = serde_json::to_vec(envelope)?;
        let routing_key = envelope.channel.as_str();

        self.send(
            &self.exchange,
            routing_key,
            &payload,
            Self::envelope_properties(envelope),
        )
        .await?;

        debug!(
            request_id = %envelope.request_id,
            routing_key,
            "Envelope published"
        );

        Ok(())
    }
}

#[async_trait]
impl RetryPublisher for AmqpPublisher {
    async fn publish_retry(
        &self,
        envelope: &MessageEnvelope,
        delay: Duration,
    ) -> Result<(), Error> {
        let payload = serde_json::to_vec(envelope)?;
        let expiration = delay.as_millis().max(1).to_string();

        self.send(
            "",
            &envelope.channel.retry_queue_name(),
            &payload,
            Self::envelope_properties(envelope).with_expiration(expiration.into()),
        )
        .await
    }

    async fn publish_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), Error> {
        let payload = serde_json::to_vec(message)?;

        self.send(
            "",
            &self.dead_letter_queue,
            &payload,
            BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(2),
        )
        .await
    }
}
