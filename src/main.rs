use std::{sync::Arc, time::Duration};

use anyhow::{Context, Error, Result};
use notification_gateway::{
    api::{AppState, run_api_server},
    auth::JwtAuthenticator,
    clients::{
        circuit_breaker::CircuitBreaker,
        health::HealthChecker,
        rbmq::{Broker, RabbitMqClient},
        redis::{RedisClient, TtlStore},
        remote::{HttpEntityChecker, RemoteResource},
    },
    config::Config,
    services::{
        DependencyValidator, Dispatcher, IdempotencyGuard, QueuePublisher, StatusStore,
    },
    utils::retry_with_backoff,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing();

    let config = Config::load()?;
    let retry_config = config.retry_config();

    let redis = retry_with_backoff("redis", &retry_config, || {
        RedisClient::connect(&config.redis_url)
    })
    .await
    .context("Could not connect to Redis")?;
    let store: Arc<dyn TtlStore> = Arc::new(redis);

    let rabbitmq = retry_with_backoff("rabbitmq", &retry_config, || {
        RabbitMqClient::connect(&config.rabbitmq_url)
    })
    .await
    .context("Could not connect to RabbitMQ")?;
    let broker: Arc<dyn Broker> = Arc::new(rabbitmq);

    let publisher = QueuePublisher::new(broker.clone(), config.broker_topology());
    publisher.declare_topology().await?;

    let breaker_config = config.circuit_breaker_config();
    let users = DependencyValidator::new(
        "user",
        store.clone(),
        Duration::from_secs(config.user_cache_ttl_seconds),
        Arc::new(HttpEntityChecker::new(
            &config.user_service_url,
            RemoteResource::Users,
            config.http_client_timeout(),
        )?),
        Arc::new(CircuitBreaker::new("user", breaker_config.clone())),
    );
    let templates = DependencyValidator::new(
        "template",
        store.clone(),
        Duration::from_secs(config.template_cache_ttl_seconds),
        Arc::new(HttpEntityChecker::new(
            &config.template_service_url,
            RemoteResource::Templates,
            config.http_client_timeout(),
        )?),
        Arc::new(CircuitBreaker::new("template", breaker_config)),
    );

    let dispatcher = Dispatcher::new(
        IdempotencyGuard::new(
            store.clone(),
            Duration::from_secs(config.idempotency_ttl_seconds),
        ),
        users,
        templates,
        publisher,
        StatusStore::new(store.clone(), Duration::from_secs(config.status_ttl_seconds)),
        config.dispatch_settings(),
    );

    let state = Arc::new(AppState {
        dispatcher,
        authenticator: Arc::new(JwtAuthenticator::new(&config.jwt_secret)),
        health_checker: HealthChecker::new(store, broker),
    });

    info!(port = config.server_port, "Notification gateway initialised");

    run_api_server(config.server_port, state).await
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
