use tracing::info;

use crate::models::message::PushPayload;
use crate::senders::SendOutcome;

const SIMULATED_FAILURE_RATE: f64 = 0.1;

/// Mock push provider delivery.
pub async fn send(payload: &PushPayload, force_failure: bool) -> SendOutcome {
    if payload.device_token.len() < 8 {
        return SendOutcome::Terminal("device token rejected by provider".to_string());
    }

    if force_failure {
        return SendOutcome::Retriable("forced failure for retry testing".to_string());
    }

    if rand::random::<f64>() < SIMULATED_FAILURE_RATE {
        return SendOutcome::Retriable("simulated push provider failure".to_string());
    }

    info!(title = %payload.title, "Push notification sent");

    SendOutcome::Delivered
}
