use tracing::info;

use crate::models::message::EmailPayload;
use crate::senders::SendOutcome;

/// Chance of a simulated transient provider failure per attempt.
const SIMULATED_FAILURE_RATE: f64 = 0.1;

/// Mock SMTP delivery. A production build would hand the payload to an
/// SMTP relay or transactional email API behind the same outcome contract.
pub async fn send(payload: &EmailPayload, force_failure: bool) -> SendOutcome {
    if !payload.to.contains('@') {
        return SendOutcome::Terminal(format!("invalid recipient address: {}", payload.to));
    }

    if force_failure {
        return SendOutcome::Retriable("forced failure for retry testing".to_string());
    }

    if rand::random::<f64>() < SIMULATED_FAILURE_RATE {
        return SendOutcome::Retriable("simulated email provider outage".to_string());
    }

    info!(to = %payload.to, subject = %payload.subject, "Email sent");

    SendOutcome::Delivered
}
