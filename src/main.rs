use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_gateway::{
    api::{AppState, run_api_server},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::PostgresLedger,
        health::HealthChecker,
        publisher::AmqpPublisher,
        rbmq::RabbitMqConnection,
        redis::RedisStore,
        template::TemplateServiceClient,
        topology::{Topology, TopologyManager},
        user::UserServiceClient,
    },
    config::Config,
    services::{gates::GateChain, metrics::RequestMetrics, pipeline::AdmissionPipeline},
    store::{CacheStore, StatusLedger},
    utils::init_tracing,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Error> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install TLS crypto provider"))?;

    let config = Config::load()?;
    init_tracing(&config.log_level, &config.log_format)?;

    let channels = config.configured_channels()?;
    info!(channels = ?config.channels, "Starting notification gateway");

    let cache: Arc<dyn CacheStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);
    let ledger: Arc<dyn StatusLedger> =
        Arc::new(PostgresLedger::connect(&config.database_url).await?);
    let broker =
        Arc::new(RabbitMqConnection::connect(&config.rabbitmq_url, config.retry_config()).await?);

    TopologyManager::new(
        broker.clone(),
        Topology::new(
            config.exchange_name.clone(),
            channels,
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
    let preferences = Arc::new(UserServiceClient::new(
        &config.user_service_url,
        &config.user_service_api_key,
        config.http_timeout(),
        cache.clone(),
        config.user_pref_cache_ttl(),
    )?);
    let templates = Arc::new(TemplateServiceClient::new(
        &config.template_service_url,
        config.http_timeout(),
    )?);

    let breaker = Arc::new(CircuitBreaker::new(
        "notification_gateway",
        config.circuit_breaker_config(),
    ));
    let gates = Arc::new(GateChain::from_config(&config, cache.clone(), breaker.clone())?);

    let state = Arc::new(AppState {
        pipeline: AdmissionPipeline::new(
            cache.clone(),
            ledger.clone(),
            preferences,
            templates,
            publisher,
            config.idempotency_ttl(),
        ),
        health_checker: HealthChecker::new(cache, ledger)
            .with_broker(broker)
            .with_circuit_breaker(breaker),
        metrics: Arc::new(RequestMetrics::new()),
    });

    run_api_server(state, gates, config.server_port).await
}
