use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::models::message::{
    Channel, EmailPayload, NotificationPayload, PushPayload, SmsPayload,
};

const MAX_SMS_LENGTH: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub user_id: String,
    pub idempotency_key: String,
    pub payload: NotificationPayload,
}

/// Validate an inbound request body against the schema for `channel`,
/// collecting every field-level problem instead of stopping at the first.
pub fn parse_request(channel: Channel, body: &Value) -> Result<ParsedRequest, Vec<FieldIssue>> {
    let mut issues = Vec::new();

    let user_id = required_string(body, "userId", &mut issues, "userId required for rate limiting");
    let idempotency_key = required_string(
        body,
        "idempotencyKey",
        &mut issues,
        "idempotencyKey is required",
    );

    let payload = match body.get("payload") {
        Some(Value::Object(_)) => {
            let payload_value = &body["payload"];
            match channel {
                Channel::Email => parse_email_payload(payload_value, &mut issues),
                Channel::Sms => parse_sms_payload(payload_value, &mut issues),
                Channel::Push => parse_push_payload(payload_value, &mut issues),
            }
        }
        Some(_) => {
            issues.push(FieldIssue::new("payload", "payload must be an object"));
            None
        }
        None => {
            issues.push(FieldIssue::new("payload", "payload is required"));
            None
        }
    };

    match (user_id, idempotency_key, payload) {
        (Some(user_id), Some(idempotency_key), Some(payload)) if issues.is_empty() => {
            Ok(ParsedRequest {
                user_id,
                idempotency_key,
                payload,
            })
        }
        _ => Err(issues),
    }
}

fn parse_email_payload(payload: &Value, issues: &mut Vec<FieldIssue>) -> Option<NotificationPayload> {
    let to = required_string(payload, "to", issues, "to is required");
    if let Some(address) = &to {
        if !is_valid_email(address) {
            issues.push(FieldIssue::new("to", "to must be a valid email address"));
        }
    }

    let subject = required_string(payload, "subject", issues, "subject is required");
    let body = required_string(payload, "body", issues, "body is required");
    let cc = optional_address_list(payload, "cc", issues);
    let bcc = optional_address_list(payload, "bcc", issues);

    if !issues.is_empty() {
        return None;
    }

    Some(NotificationPayload::Email(EmailPayload {
        to: to?,
        subject: subject?,
        body: body?,
        cc,
        bcc,
    }))
}

fn parse_sms_payload(payload: &Value, issues: &mut Vec<FieldIssue>) -> Option<NotificationPayload> {
    let to = required_string(payload, "to", issues, "to is required");
    if let Some(number) = &to {
        if number.len() < 10 {
            issues.push(FieldIssue::new("to", "to must be at least 10 characters"));
        }
    }

    let message = required_string(payload, "message", issues, "message is required");
    if let Some(text) = &message {
        if text.len() > MAX_SMS_LENGTH {
            issues.push(FieldIssue::new(
                "message",
                format!("message must be at most {MAX_SMS_LENGTH} characters"),
            ));
        }
    }

    if !issues.is_empty() {
        return None;
    }

    Some(NotificationPayload::Sms(SmsPayload {
        to: to?,
        message: message?,
    }))
}

fn parse_push_payload(payload: &Value, issues: &mut Vec<FieldIssue>) -> Option<NotificationPayload> {
    let device_token = required_string(payload, "deviceToken", issues, "deviceToken is required");
    let title = required_string(payload, "title", issues, "title is required");
    let body = required_string(payload, "body", issues, "body is required");

    let data = match payload.get("data") {
        None | Some(Value::Null) => None,
        Some(Value::Object(entries)) => {
            let mut map = HashMap::new();
            for (key, value) in entries {
                match value.as_str() {
                    Some(text) => {
                        map.insert(key.clone(), text.to_string());
                    }
                    None => issues.push(FieldIssue::new(
                        format!("data.{key}"),
                        "data values must be strings",
                    )),
                }
            }
            Some(map)
        }
        Some(_) => {
            issues.push(FieldIssue::new("data", "data must be an object"));
            None
        }
    };

    if !issues.is_empty() {
        return None;
    }

    Some(NotificationPayload::Push(PushPayload {
        device_token: device_token?,
        title: title?,
        body: body?,
        data,
    }))
}

fn required_string(
    value: &Value,
    field: &str,
    issues: &mut Vec<FieldIssue>,
    message: &str,
) -> Option<String> {
    match value.get(field).and_then(Value::as_str) {
        Some(text) if !text.is_empty() => Some(text.to_string()),
        _ => {
            issues.push(FieldIssue::new(field, message));
            None
        }
    }
}

fn optional_address_list(
    payload: &Value,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<Vec<String>> {
    match payload.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Array(entries)) => {
            let mut addresses = Vec::with_capacity(entries.len());
            for (index, entry) in entries.iter().enumerate() {
                match entry.as_str() {
                    Some(address) if is_valid_email(address) => {
                        addresses.push(address.to_string());
                    }
                    _ => issues.push(FieldIssue::new(
                        format!("{field}[{index}]"),
                        format!("{field} entries must be valid email addresses"),
                    )),
                }
            }
            Some(addresses)
        }
        Some(_) => {
            issues.push(FieldIssue::new(
                field,
                format!("{field} must be an array of email addresses"),
            ));
            None
        }
    }
}

pub fn is_valid_email(address: &str) -> bool {
    if address.len() > 254 || address.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = address.rsplit_once('@') else {
        return false;
    };

    if local.is_empty() || local.len() > 64 || domain.len() < 3 {
        return false;
    }

    // Domain needs at least one dot separating non-empty labels.
    domain.contains('.') && domain.split('.').all(|label| !label.is_empty())
}
