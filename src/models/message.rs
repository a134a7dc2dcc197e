use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::now_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Sms, Channel::Push];

    pub fn routing_key(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        }
    }

    pub fn queue_name(&self) -> &'static str {
        match self {
            Channel::Email => "notifications.email",
            Channel::Sms => "notifications.sms",
            Channel::Push => "notifications.push",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.routing_key())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailPayload {
    pub to: String,
    pub subject: String,
    pub body: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cc: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bcc: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsPayload {
    pub to: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub device_token: String,
    pub title: String,
    pub body: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
}

/// Channel payloads share one wire slot; the surrounding message's `type`
/// field names the channel, so the variants deserialize untagged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NotificationPayload {
    Email(EmailPayload),
    Sms(SmsPayload),
    Push(PushPayload),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: Uuid,

    #[serde(rename = "type")]
    pub channel: Channel,

    pub user_id: String,
    pub idempotency_key: String,
    pub payload: NotificationPayload,

    /// Milliseconds since the Unix epoch at first admission.
    pub timestamp: u64,

    #[serde(default)]
    pub retry_count: u32,
}

impl QueueMessage {
    pub fn new(
        id: Uuid,
        channel: Channel,
        user_id: String,
        idempotency_key: String,
        payload: NotificationPayload,
    ) -> Self {
        Self {
            id,
            channel,
            user_id,
            idempotency_key,
            payload,
            timestamp: now_ms(),
            retry_count: 0,
        }
    }

    /// The redelivery copy: identical message with the attempt count bumped
    /// past `current_retry_count`.
    pub fn next_attempt(&self, current_retry_count: u32) -> Self {
        let mut next = self.clone();
        next.retry_count = current_retry_count + 1;
        next
    }
}
