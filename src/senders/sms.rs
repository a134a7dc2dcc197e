use tracing::info;

use crate::models::message::SmsPayload;
use crate::senders::SendOutcome;

const SIMULATED_FAILURE_RATE: f64 = 0.1;

/// Mock SMS gateway delivery.
pub async fn send(payload: &SmsPayload, force_failure: bool) -> SendOutcome {
    if payload.message.is_empty() {
        return SendOutcome::Terminal("gateway rejected empty message body".to_string());
    }

    if force_failure {
        return SendOutcome::Retriable("forced failure for retry testing".to_string());
    }

    if rand::random::<f64>() < SIMULATED_FAILURE_RATE {
        return SendOutcome::Retriable("simulated SMS gateway failure".to_string());
    }

    info!(to = %payload.to, "SMS sent");

    SendOutcome::Delivered
}
