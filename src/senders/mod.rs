use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;

use crate::models::message::{Channel, NotificationPayload, QueueMessage};

pub mod email;
pub mod push;
pub mod sms;

/// Classified result of one sender invocation. Retriable outcomes feed the
/// backoff engine; terminal outcomes go straight to the dead letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Retriable(String),
    Terminal(String),
}

/// Invoke the sender matching the message channel. A panicking sender is
/// contained and classified retriable so the consumer loop survives.
pub async fn dispatch(message: &QueueMessage, force_failure: bool) -> SendOutcome {
    let send = async {
        match (message.channel, &message.payload) {
            (Channel::Email, NotificationPayload::Email(payload)) => {
                email::send(payload, force_failure).await
            }
            (Channel::Sms, NotificationPayload::Sms(payload)) => {
                sms::send(payload, force_failure).await
            }
            (Channel::Push, NotificationPayload::Push(payload)) => {
                push::send(payload, force_failure).await
            }
            _ => SendOutcome::Terminal(format!(
                "payload does not match the {} channel",
                message.channel
            )),
        }
    };

    match AssertUnwindSafe(send).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(_) => SendOutcome::Retriable("sender panicked".to_string()),
    }
}
