use anyhow::{Error, Result};
use tracing_subscriber::EnvFilter;

use notification_service::clients::rbmq::RabbitMqClient;
use notification_service::clients::redis::RedisClient;
use notification_service::config::Config;
use notification_service::worker;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("notification_service=info,worker=info")),
        )
        .init();

    let config = Config::load()?;

    tracing::info!(
        environment = ?config.node_env,
        max_retries = config.max_retries,
        prefetch_count = config.prefetch_count,
        "Starting notification worker"
    );

    let redis = RedisClient::connect(&config).await?;
    let broker = RabbitMqClient::connect(&config).await?;

    worker::run(config, broker, redis).await
}
