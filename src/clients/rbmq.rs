use anyhow::{Error, Result, anyhow};
use lapin::{
    Channel, Connection, ConnectionProperties, Consumer,
    options::{BasicAckOptions, BasicConsumeOptions, BasicQosOptions, BasicRejectOptions},
    types::FieldTable,
};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{models::retry::RetryConfig, utils::retry_with_backoff};

/// Owns the AMQP connection shared by the publisher, the topology manager
/// and consumers. Channels are handed out from the live connection and a
/// dropped connection is re-dialled on the next request.
pub struct RabbitMqConnection {
    url: String,
    connection: RwLock<Connection>,
    reconnect: RetryConfig,
}

impl RabbitMqConnection {
    pub async fn connect(url: &str, reconnect: RetryConfig) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = Self::dial(url, &reconnect).await?;

        info!("RabbitMQ connection established");

        Ok(Self {
            url: url.to_string(),
            connection: RwLock::new(connection),
            reconnect,
        })
    }

    async fn dial(url: &str, reconnect: &RetryConfig) -> Result<Connection, Error> {
        retry_with_backoff(reconnect, || async {
            Connection::connect(url, ConnectionProperties::default())
                .await
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|_| anyhow!("Failed to connect to RabbitMQ"))
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.read().await.status().connected()
    }

    pub async fn create_channel(&self) -> Result<Channel, Error> {
        {
            let connection = self.connection.read().await;
            if connection.status().connected() {
                return connection
                    .create_channel()
                    .await
                    .map_err(|_| anyhow!("RabbitMQ channel creation failed"));
            }
        }

        let mut connection = self.connection.write().await;
        if !connection.status().connected() {
            warn!("RabbitMQ connection lost, reconnecting");
            *connection = Self::dial(&self.url, &self.reconnect).await?;
            info!("RabbitMQ connection re-established");
        }

        connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))
    }
}

/// Channel-scoped consumer operations for a single queue.
pub struct QueueConsumer {
    channel: Channel,
    queue_name: String,
}

impl QueueConsumer {
    pub async fn open(
        connection: &RabbitMqConnection,
        queue_name: &str,
        prefetch_count: u16,
    ) -> Result<Self, Error> {
        let channel = connection.create_channel().await?;

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        Ok(Self {
            channel,
            queue_name: queue_name.to_string(),
        })
    }

    pub async fn create_consumer(&self, tag: &str) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to create consumer"))?;

        info!(queue = %self.queue_name, consumer_tag = tag, "Consumer created for queue");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }
}
