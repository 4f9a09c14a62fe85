use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_gateway::{
    clients::{
        circuit_breaker::CircuitBreaker,
        database::PostgresLedger,
        email::EmailApiClient,
        fcm::FcmClient,
        publisher::AmqpPublisher,
        rbmq::{QueueConsumer, RabbitMqConnection},
        topology::{Topology, TopologyManager},
    },
    config::Config,
    models::channel::Channel,
    store::StatusLedger,
    utils::init_tracing,
    worker::{ChannelWorker, provider::DeliveryProvider, runner},
};
use tracing::info;

fn build_provider(config: &Config, channel: Channel) -> Result<Arc<dyn DeliveryProvider>, Error> {
    match channel {
        Channel::Push => {
            let project_id = config
                .fcm_project_id
                .as_deref()
                .ok_or_else(|| anyhow!("Missing environment variable FCM_PROJECT_ID"))?;

            Ok(Arc::new(FcmClient::new(project_id, config.http_timeout())?))
        }
        Channel::Email => {
            let api_url = config
                .email_api_url
                .as_deref()
                .ok_or_else(|| anyhow!("Missing environment variable EMAIL_API_URL"))?;
            let api_key = config
                .email_api_key
                .as_deref()
                .ok_or_else(|| anyhow!("Missing environment variable EMAIL_API_KEY"))?;
            let from = config
                .email_from
                .as_deref()
                .ok_or_else(|| anyhow!("Missing environment variable EMAIL_FROM"))?;

            Ok(Arc::new(EmailApiClient::new(
                api_url,
                api_key,
                from,
                config.http_timeout(),
            )?))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install TLS crypto provider"))?;

    let config = Config::load()?;
    init_tracing(&config.log_level, &config.log_format)?;

    let channel = config.worker_channel()?;
    let provider = build_provider(&config, channel)?;

    info!(channel = %channel, provider = provider.name(), "Starting channel worker");

    let ledger: Arc<dyn StatusLedger> =
        Arc::new(PostgresLedger::connect(&config.database_url).await?);
    let broker =
        Arc::new(RabbitMqConnection::connect(&config.rabbitmq_url, config.retry_config()).await?);

    // Workers may start before the gateway; declaring is idempotent.
    TopologyManager::new(
        broker.clone(),
        Topology::new(
            config.exchange_name.clone(),
            config.configured_channels()?,
            config.dead_letter_queue.clone(),
        ),
    )
    .declare()
    .await?;

    let publisher = Arc::new(AmqpPublisher::new(
        broker.clone(),
        config.exchange_name.clone(),
        config.dead_letter_queue.clone(),
    ));
    let breaker = CircuitBreaker::new(provider.name(), config.circuit_breaker_config());

    let worker = Arc::new(ChannelWorker::new(
        channel,
        provider,
        ledger,
        publisher,
        config.retry_config(),
        breaker,
    ));

    let queue = QueueConsumer::open(&broker, &channel.queue_name(), config.prefetch_count).await?;
    let consumer_tag = format!("{}-worker-{}", channel, uuid::Uuid::new_v4());

    runner::run(worker, queue, &consumer_tag).await
}
