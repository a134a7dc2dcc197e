use std::sync::Arc;
use std::time::Duration;

use anyhow::{Error, Result};
use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::types::{AMQPValue, ShortString};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::clients::rbmq::RabbitMqClient;
use crate::clients::redis::RedisClient;
use crate::config::Config;
use crate::models::message::{Channel, QueueMessage};
use crate::models::retry::RetryPolicy;
use crate::senders::{self, SendOutcome};
use crate::utils::shutdown_signal;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// What the pipeline does with a delivery after the sender outcome is in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Delivered,
    Retry { delay: Duration },
    DeadLetter { reason: String },
}

/// Map a sender outcome and the message's attempt count onto a disposition.
pub fn decide(outcome: &SendOutcome, retry_count: u32, policy: &RetryPolicy) -> Disposition {
    match outcome {
        SendOutcome::Delivered => Disposition::Delivered,
        SendOutcome::Retriable(_) if policy.can_retry(retry_count) => Disposition::Retry {
            delay: policy.backoff_delay(retry_count),
        },
        SendOutcome::Retriable(reason) => Disposition::DeadLetter {
            reason: format!("retries exhausted: {reason}"),
        },
        SendOutcome::Terminal(reason) => Disposition::DeadLetter {
            reason: reason.clone(),
        },
    }
}

/// Run one consumer per channel queue until a shutdown signal arrives,
/// then close the broker link so unacked deliveries requeue elsewhere.
pub async fn run(
    config: Config,
    broker: Arc<RabbitMqClient>,
    redis: RedisClient,
) -> Result<(), Error> {
    let mut consumers = JoinSet::new();

    for channel in Channel::ALL {
        consumers.spawn(consume_channel(
            channel,
            Arc::clone(&broker),
            redis.clone(),
            config.clone(),
        ));
    }

    shutdown_signal().await;
    info!("Shutdown signal received, closing broker connection");
    broker.close().await;

    let drain = async {
        while consumers.join_next().await.is_some() {}
    };
    if timeout(DRAIN_TIMEOUT, drain).await.is_err() {
        warn!(
            timeout_secs = DRAIN_TIMEOUT.as_secs(),
            "Consumer drain timed out, aborting remaining tasks"
        );
    }

    Ok(())
}

async fn consume_channel(
    channel: Channel,
    broker: Arc<RabbitMqClient>,
    redis: RedisClient,
    config: Config,
) {
    let policy = RetryPolicy::from_config(&config);

    loop {
        let mut consumer = match broker.create_consumer(channel).await {
            Ok(consumer) => consumer,
            Err(e) => {
                if broker.is_closed() {
                    return;
                }
                warn!(channel = %channel, error = %e, "Failed to create consumer, retrying");
                sleep(RESUBSCRIBE_DELAY).await;
                continue;
            }
        };

        info!(queue = channel.queue_name(), "Consumer started");

        while let Some(delivery) = consumer.next().await {
            match delivery {
                Ok(delivery) => {
                    tokio::spawn(handle_delivery(
                        delivery,
                        Arc::clone(&broker),
                        redis.clone(),
                        policy,
                        config.force_failure,
                    ));
                }
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Consumer stream error");
                    break;
                }
            }
        }

        if broker.is_closed() {
            return;
        }

        warn!(channel = %channel, "Consumer stream ended, re-subscribing");
        sleep(RESUBSCRIBE_DELAY).await;
    }
}

/// Per-message pipeline: decode, delivered-guard, send, then ack /
/// delayed-republish / dead-letter according to the decided disposition.
pub async fn handle_delivery(
    delivery: Delivery,
    broker: Arc<RabbitMqClient>,
    mut redis: RedisClient,
    policy: RetryPolicy,
    force_failure: bool,
) {
    let delivery_tag = delivery.delivery_tag;

    let message = match serde_json::from_slice::<QueueMessage>(&delivery.data) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Undecodable message, routing to dead letter queue");
            if let Err(e) = broker.reject(delivery_tag, false).await {
                error!(error = %e, "Failed to reject undecodable message");
            }
            return;
        }
    };

    // The broker header mirror wins over the body count when both exist.
    let retry_count = header_retry_count(&delivery).unwrap_or(message.retry_count);

    info!(
        id = %message.id,
        channel = %message.channel,
        user_id = %message.user_id,
        retry_count,
        "Processing notification message"
    );

    match redis
        .is_delivered(&message.user_id, &message.idempotency_key)
        .await
    {
        Ok(true) => {
            info!(
                idempotency_key = %message.idempotency_key,
                "Notification already delivered, skipping sender"
            );
            if let Err(e) = broker.acknowledge(delivery_tag).await {
                error!(error = %e, "Failed to acknowledge duplicate delivery");
            }
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(error = %e, "Delivered guard lookup failed, proceeding with send");
        }
    }

    let outcome = senders::dispatch(&message, force_failure).await;

    if let SendOutcome::Retriable(reason) | SendOutcome::Terminal(reason) = &outcome {
        warn!(id = %message.id, reason = %reason, "Sender did not deliver");
    }

    match decide(&outcome, retry_count, &policy) {
        Disposition::Delivered => {
            if let Err(e) = redis
                .mark_delivered(&message.user_id, &message.idempotency_key)
                .await
            {
                warn!(
                    error = %e,
                    idempotency_key = %message.idempotency_key,
                    "Failed to record delivery, a redelivery may invoke the sender again"
                );
            }
            if let Err(e) = broker.acknowledge(delivery_tag).await {
                error!(error = %e, "Failed to acknowledge delivered message");
            }
        }
        Disposition::Retry { delay } => {
            info!(
                id = %message.id,
                delay_ms = delay.as_millis() as u64,
                attempt = retry_count + 2,
                max_attempts = policy.max_retries + 1,
                "Scheduling retry"
            );

            sleep(delay).await;

            let next = message.next_attempt(retry_count);
            match broker.publish(&next).await {
                Ok(true) => {
                    if let Err(e) = broker.acknowledge(delivery_tag).await {
                        error!(error = %e, "Failed to acknowledge retried message");
                    }
                }
                Ok(false) | Err(_) => {
                    error!(
                        id = %message.id,
                        "Failed to republish retry, routing original to dead letter queue"
                    );
                    if let Err(e) = broker.reject(delivery_tag, false).await {
                        error!(error = %e, "Failed to reject message after republish failure");
                    }
                }
            }
        }
        Disposition::DeadLetter { reason } => {
            warn!(
                id = %message.id,
                retry_count,
                reason = %reason,
                "Routing message to dead letter queue"
            );
            if let Err(e) = broker.reject(delivery_tag, false).await {
                error!(error = %e, "Failed to reject message");
            }
        }
    }
}

fn header_retry_count(delivery: &Delivery) -> Option<u32> {
    let headers = delivery.properties.headers().as_ref()?;

    match headers.inner().get(&ShortString::from("x-retry-count"))? {
        AMQPValue::LongUInt(count) => Some(*count),
        AMQPValue::LongInt(count) => u32::try_from(*count).ok(),
        AMQPValue::LongLongInt(count) => u32::try_from(*count).ok(),
        AMQPValue::ShortUInt(count) => Some(u32::from(*count)),
        AMQPValue::ShortInt(count) => u32::try_from(*count).ok(),
        _ => None,
    }
}
