use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use lapin::{
    ExchangeKind,
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
};
use tracing::info;

use crate::{clients::rbmq::RabbitMqConnection, models::channel::Channel};

const DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
const DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";

/// One durable queue the topology needs, with its binding if it has one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub arguments: Vec<(String, String)>,
    pub routing_key: Option<String>,
}

impl QueueDeclaration {
    fn field_table(&self) -> FieldTable {
        let mut table = FieldTable::default();
        for (key, value) in &self.arguments {
            table.insert(
                ShortString::from(key.as_str()),
                AMQPValue::LongString(LongString::from(value.as_str())),
            );
        }
        table
    }
}

/// Broker layout for the notification pipeline:
///
/// - `exchange` (direct, durable)
/// - `<channel>.queue` bound under `<channel>`, dead-lettering into the shared
///   dead-letter queue
/// - `<channel>.retry.queue`, unbound, dead-lettering back into `exchange`
///   under `<channel>` once a message's per-message TTL expires
/// - the dead-letter queue itself, unbound
#[derive(Debug, Clone)]
pub struct Topology {
    pub exchange: String,
    pub channels: Vec<Channel>,
    pub dead_letter_queue: String,
}

impl Topology {
    pub fn new(exchange: String, channels: Vec<Channel>, dead_letter_queue: String) -> Self {
        Self {
            exchange,
            channels,
            dead_letter_queue,
        }
    }

    /// Queues in declaration order. The dead-letter queue comes first so the
    /// channel queues never reference a queue that does not exist yet.
    pub fn queues(&self) -> Vec<QueueDeclaration> {
        let mut queues = vec![QueueDeclaration {
            name: self.dead_letter_queue.clone(),
            arguments: Vec::new(),
            routing_key: None,
        }];

        for channel in &self.channels {
            queues.push(QueueDeclaration {
                name: channel.queue_name(),
                arguments: vec![
                    (DEAD_LETTER_EXCHANGE.to_string(), String::new()),
                    (
                        DEAD_LETTER_ROUTING_KEY.to_string(),
                        self.dead_letter_queue.clone(),
                    ),
                ],
                routing_key: Some(channel.as_str().to_string()),
            });

            queues.push(QueueDeclaration {
                name: channel.retry_queue_name(),
                arguments: vec![
                    (DEAD_LETTER_EXCHANGE.to_string(), self.exchange.clone()),
                    (
                        DEAD_LETTER_ROUTING_KEY.to_string(),
                        channel.as_str().to_string(),
                    ),
                ],
                routing_key: None,
            });
        }

        queues
    }
}

/// Declares a [`Topology`] on the broker. Re-declaring an identical layout
/// is a no-op; a conflicting one is rejected by the broker and returned as an
/// error.
pub struct TopologyManager {
    connection: Arc<RabbitMqConnection>,
    topology: Topology,
}

impl TopologyManager {
    pub fn new(connection: Arc<RabbitMqConnection>, topology: Topology) -> Self {
        Self {
            connection,
            topology,
        }
    }

    pub async fn declare(&self) -> Result<(), Error> {
        let channel = self.connection.create_channel().await?;

        channel
            .exchange_declare(
                &self.topology.exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare exchange {}: {}", self.topology.exchange, e))?;

        for queue in self.topology.queues() {
            channel
                .queue_declare(
                    &queue.name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    queue.field_table(),
                )
                .await
                .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue.name, e))?;

            if let Some(routing_key) = &queue.routing_key {
                channel
                    .queue_bind(
                        &queue.name,
                        &self.topology.exchange,
                        routing_key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| anyhow!("Failed to bind queue {}: {}", queue.name, e))?;
            }

            info!(queue = %queue.name, "Queue declared");
        }

        info!(
            exchange = %self.topology.exchange,
            channels = self.topology.channels.len(),
            "Notification topology declared"
        );

        Ok(())
    }
}
