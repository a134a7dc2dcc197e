use anyhow::{Error, Result};
use tracing_subscriber::EnvFilter;

use notification_service::api::{run_api_server, AppState};
use notification_service::clients::rate_limiter::RateLimiter;
use notification_service::clients::rbmq::RabbitMqClient;
use notification_service::clients::redis::RedisClient;
use notification_service::config::Config;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("notification_service=info,ingress=info,tower_http=info")
        }))
        .init();

    let config = Config::load()?;

    tracing::info!(environment = ?config.node_env, "Starting notification ingress");

    let redis = RedisClient::connect(&config).await?;
    let broker = RabbitMqClient::connect(&config).await?;
    let limiter = RateLimiter::new(redis.connection(), &config);

    let state = AppState {
        config,
        broker,
        redis,
        limiter,
    };

    run_api_server(state).await
}
