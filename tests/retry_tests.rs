use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use notification_service::models::retry::{RetryConfig, RetryPolicy};
use notification_service::senders::SendOutcome;
use notification_service::utils::retry_with_backoff;
use notification_service::worker::{decide, Disposition};
use tokio::time::Instant;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 5,
        base_delay_ms: 1_000,
        max_delay_ms: 16_000,
    }
}

/// Test: Backoff delays double per attempt: 1s, 2s, 4s, 8s, 16s
#[test]
fn test_backoff_delay_sequence() {
    let policy = policy();

    let expected = [1_000, 2_000, 4_000, 8_000, 16_000];
    for (retry_count, expected_ms) in expected.iter().enumerate() {
        assert_eq!(
            policy.backoff_delay(retry_count as u32),
            Duration::from_millis(*expected_ms),
            "Wrong delay for retry_count {retry_count}"
        );
    }
}

/// Test: Backoff delay is capped at the configured maximum
#[test]
fn test_backoff_delay_is_capped() {
    let policy = policy();

    assert_eq!(policy.backoff_delay(5), Duration::from_millis(16_000));
    assert_eq!(policy.backoff_delay(40), Duration::from_millis(16_000));
    assert_eq!(policy.backoff_delay(200), Duration::from_millis(16_000));
}

/// Test: Retries are permitted strictly below the maximum
#[test]
fn test_can_retry_boundary() {
    let policy = policy();

    assert!(policy.can_retry(0));
    assert!(policy.can_retry(4));
    assert!(!policy.can_retry(5));
    assert!(!policy.can_retry(6));
}

/// Test: Successful sends are acknowledged without retry
#[test]
fn test_delivered_outcome_is_final() {
    let disposition = decide(&SendOutcome::Delivered, 0, &policy());
    assert_eq!(disposition, Disposition::Delivered);

    let disposition = decide(&SendOutcome::Delivered, 4, &policy());
    assert_eq!(disposition, Disposition::Delivered);
}

/// Test: Retriable failures below the cap schedule a backoff retry
#[test]
fn test_retriable_outcome_schedules_retry() {
    let outcome = SendOutcome::Retriable("upstream 503".to_string());

    for retry_count in 0..5 {
        match decide(&outcome, retry_count, &policy()) {
            Disposition::Retry { delay } => {
                assert_eq!(delay, policy().backoff_delay(retry_count));
            }
            other => panic!("Expected retry for retry_count {retry_count}, got {other:?}"),
        }
    }
}

/// Test: Retriable failures at the cap are dead-lettered
#[test]
fn test_exhausted_retries_are_dead_lettered() {
    let outcome = SendOutcome::Retriable("upstream 503".to_string());

    match decide(&outcome, 5, &policy()) {
        Disposition::DeadLetter { reason } => {
            assert!(reason.contains("retries exhausted"), "reason: {reason}");
        }
        other => panic!("Expected dead letter, got {other:?}"),
    }
}

/// Test: Terminal failures skip retries entirely
#[test]
fn test_terminal_outcome_is_dead_lettered_immediately() {
    let outcome = SendOutcome::Terminal("permanent 4xx".to_string());

    match decide(&outcome, 0, &policy()) {
        Disposition::DeadLetter { reason } => assert_eq!(reason, "permanent 4xx"),
        other => panic!("Expected dead letter, got {other:?}"),
    }
}

/// Test: A message that always fails retriably is attempted at most
/// max_retries + 1 times before landing in the dead letter queue
#[test]
fn test_total_attempts_are_bounded() {
    let policy = policy();
    let outcome = SendOutcome::Retriable("always failing".to_string());

    let mut retry_count = 0;
    let mut invocations = 0;

    loop {
        invocations += 1;

        match decide(&outcome, retry_count, &policy) {
            Disposition::Retry { .. } => retry_count += 1,
            Disposition::DeadLetter { .. } => break,
            Disposition::Delivered => unreachable!(),
        }
    }

    assert_eq!(invocations, policy.max_retries + 1);
}

/// Test: Store writes retry with the dedicated config and surface the
/// error from the final attempt, not the first
#[tokio::test]
async fn test_store_write_retries_surface_last_error() -> Result<()> {
    let config = RetryConfig::store_writes();

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);

    let result = retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), String>(format!("write failed on attempt {attempt}"))
        }
    })
    .await;

    assert_eq!(attempt_count.load(Ordering::SeqCst), config.max_attempts);
    assert_eq!(
        result.unwrap_err(),
        format!("write failed on attempt {}", config.max_attempts),
        "the caller should see the final attempt's error"
    );

    Ok(())
}

/// Test: Recovery after a transient failure waits out at least the
/// jitter-adjusted lower bound of the initial delay
#[tokio::test]
async fn test_recovery_waits_at_least_the_jittered_delay() -> Result<()> {
    let config = RetryConfig {
        max_attempts: 2,
        initial_delay_ms: 100,
        max_delay_ms: 1_000,
        backoff_multiplier: 2,
    };

    let attempt_count = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempt_count);
    let started = Instant::now();

    let result = retry_with_backoff(&config, || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow!("first write rejected"))
            } else {
                Ok("stored")
            }
        }
    })
    .await?;

    assert_eq!(result, "stored");
    assert_eq!(attempt_count.load(Ordering::SeqCst), 2);

    // Jitter is bounded at ±10% of the nominal delay.
    assert!(
        started.elapsed() >= Duration::from_millis(90),
        "the second attempt must not start before the jitter lower bound"
    );

    Ok(())
}
