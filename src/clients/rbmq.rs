use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Error, Result};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel as AmqpChannel, Connection, ConnectionProperties, Consumer,
    ExchangeKind,
};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Duration};
use tracing::{info, warn};

use crate::config::Config;
use crate::models::message::{Channel, QueueMessage};
use crate::models::retry::RetryConfig;
use crate::utils::retry_with_backoff;

pub const NOTIFICATIONS_EXCHANGE: &str = "notifications.exchange";
pub const DEAD_LETTER_EXCHANGE: &str = "notifications.dlx";
pub const DEAD_LETTER_QUEUE: &str = "notifications.dlq";
pub const DEAD_LETTER_ROUTING_KEY: &str = "dead";

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const CONNECTION_POLL_INTERVAL: Duration = Duration::from_secs(5);
const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

struct BrokerLink {
    connection: Connection,
    channel: AmqpChannel,
}

/// Broker client shared by the ingress publisher and the worker consumers.
///
/// Startup retries the first connection up to ten times; afterwards a
/// monitor task re-establishes the link indefinitely with exponential
/// backoff whenever the connection drops.
pub struct RabbitMqClient {
    link: Arc<RwLock<Option<BrokerLink>>>,
    broker_url: String,
    prefetch_count: u16,
    closed: AtomicBool,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Arc<Self>, Error> {
        info!("Connecting to broker");

        let client = Arc::new(Self {
            link: Arc::new(RwLock::new(None)),
            broker_url: config.broker_url.clone(),
            prefetch_count: config.prefetch_count,
            closed: AtomicBool::new(false),
        });

        let link = retry_with_backoff(&RetryConfig::startup(), || {
            Self::establish(&client.broker_url, client.prefetch_count)
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to broker: {e}"))?;

        *client.link.write().await = Some(link);
        info!("Broker connection established");

        Arc::clone(&client).spawn_reconnect_monitor();

        Ok(client)
    }

    async fn establish(broker_url: &str, prefetch_count: u16) -> Result<BrokerLink, Error> {
        let connection = Connection::connect(broker_url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Broker connection failed: {e}"))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("Broker channel creation failed: {e}"))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to enable publisher confirms: {e}"))?;

        channel
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set prefetch count: {e}"))?;

        Self::assert_topology(&channel).await?;

        Ok(BrokerLink {
            connection,
            channel,
        })
    }

    /// Declare the full queue fabric. Declarations are idempotent, so every
    /// connect re-asserts the same objects on both ingress and worker.
    async fn assert_topology(channel: &AmqpChannel) -> Result<(), Error> {
        let durable_exchange = ExchangeDeclareOptions {
            durable: true,
            ..Default::default()
        };
        let durable_queue = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .exchange_declare(
                DEAD_LETTER_EXCHANGE,
                ExchangeKind::Direct,
                durable_exchange,
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare dead letter exchange: {e}"))?;

        channel
            .queue_declare(DEAD_LETTER_QUEUE, durable_queue, FieldTable::default())
            .await
            .map_err(|e| anyhow!("Failed to declare dead letter queue: {e}"))?;

        channel
            .queue_bind(
                DEAD_LETTER_QUEUE,
                DEAD_LETTER_EXCHANGE,
                DEAD_LETTER_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to bind dead letter queue: {e}"))?;

        channel
            .exchange_declare(
                NOTIFICATIONS_EXCHANGE,
                ExchangeKind::Direct,
                durable_exchange,
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare notifications exchange: {e}"))?;

        let mut dead_letter_args = FieldTable::default();
        dead_letter_args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(DEAD_LETTER_EXCHANGE.into()),
        );
        dead_letter_args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(DEAD_LETTER_ROUTING_KEY.into()),
        );

        for kind in Channel::ALL {
            channel
                .queue_declare(kind.queue_name(), durable_queue, dead_letter_args.clone())
                .await
                .map_err(|e| anyhow!("Failed to declare queue {}: {e}", kind.queue_name()))?;

            channel
                .queue_bind(
                    kind.queue_name(),
                    NOTIFICATIONS_EXCHANGE,
                    kind.routing_key(),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to bind queue {}: {e}", kind.queue_name()))?;

            info!(queue = kind.queue_name(), "Queue declared");
        }

        Ok(())
    }

    fn spawn_reconnect_monitor(self: Arc<Self>) {
        let client = self;

        tokio::spawn(async move {
            loop {
                sleep(CONNECTION_POLL_INTERVAL).await;

                if client.is_closed() {
                    return;
                }
                if client.is_connected().await {
                    continue;
                }

                warn!("Broker connection lost, reconnecting");

                let mut delay = RECONNECT_INITIAL_DELAY;
                loop {
                    if client.is_closed() {
                        return;
                    }

                    match Self::establish(&client.broker_url, client.prefetch_count).await {
                        Ok(link) => {
                            *client.link.write().await = Some(link);
                            info!("Broker connection re-established");
                            break;
                        }
                        Err(e) => {
                            warn!(
                                error = %e,
                                retry_in_ms = delay.as_millis() as u64,
                                "Broker reconnect failed, backing off"
                            );
                            sleep(delay).await;
                            delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                        }
                    }
                }
            }
        });
    }

    pub async fn is_connected(&self) -> bool {
        match self.link.read().await.as_ref() {
            Some(link) => {
                link.connection.status().connected() && link.channel.status().connected()
            }
            None => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Publish a message to its channel queue: persistent delivery,
    /// JSON content type, the message id as `message-id`, and
    /// `x-retry-count` / `x-idempotency-key` header mirrors.
    ///
    /// Returns whether the broker confirmed acceptance.
    pub async fn publish(&self, message: &QueueMessage) -> Result<bool, Error> {
        let guard = self.link.read().await;
        let link = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Broker channel is not available"))?;

        let payload = serde_json::to_vec(message)?;

        let mut headers = FieldTable::default();
        headers.insert("x-retry-count".into(), AMQPValue::LongUInt(message.retry_count));
        headers.insert(
            "x-idempotency-key".into(),
            AMQPValue::LongString(message.idempotency_key.as_str().into()),
        );

        let properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into())
            .with_message_id(message.id.to_string().into())
            .with_headers(headers);

        let publish = async {
            link.channel
                .basic_publish(
                    NOTIFICATIONS_EXCHANGE,
                    message.channel.routing_key(),
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await
                .map_err(|e| anyhow!("Failed to publish message: {e}"))?
                .await
                .map_err(|e| anyhow!("Broker did not confirm publish: {e}"))
        };

        let confirmation = timeout(PUBLISH_TIMEOUT, publish)
            .await
            .map_err(|_| anyhow!("Publish timed out"))??;

        Ok(!matches!(confirmation, Confirmation::Nack(_)))
    }

    pub async fn create_consumer(&self, channel: Channel) -> Result<Consumer, Error> {
        let guard = self.link.read().await;
        let link = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Broker channel is not available"))?;

        let consumer = link
            .channel
            .basic_consume(
                channel.queue_name(),
                &format!("{}-worker", channel.routing_key()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {e}"))?;

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        let guard = self.link.read().await;
        let link = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Broker channel is not available"))?;

        link.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {e}"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        let guard = self.link.read().await;
        let link = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Broker channel is not available"))?;

        link.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {e}"))?;

        Ok(())
    }

    /// Close the channel and connection so unacked deliveries requeue for
    /// another worker.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);

        if let Some(link) = self.link.write().await.take() {
            let _ = link.channel.close(200, "shutdown").await;
            let _ = link.connection.close(200, "shutdown").await;
        }
    }
}
