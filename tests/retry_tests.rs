use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use anyhow::{Result, anyhow};
use notification_gateway::{models::retry::RetryConfig, utils::retry_with_backoff};
use tokio::time::Instant;

fn config(max_attempts: u32, initial_delay_ms: u64) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms,
        max_delay_ms: 1000,
        backoff_multiplier: 2,
    }
}

/// Test: Failures are retried until the operation succeeds
#[tokio::test]
async fn test_transient_failures_are_retried() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(5, 10), || {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(anyhow!("connection refused"))
            } else {
                Ok("connected")
            }
        }
    })
    .await?;

    assert_eq!(result, "connected");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    Ok(())
}

/// Test: The last error is returned once attempts are exhausted
#[tokio::test]
async fn test_exhausted_attempts_return_last_error() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let result = retry_with_backoff(&config(3, 5), || {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Err::<(), _>(anyhow!("attempt {} failed", n))
        }
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "attempt 3 failed");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    Ok(())
}

/// Test: A zero attempt budget still runs the operation once
#[tokio::test]
async fn test_zero_attempts_runs_once() -> Result<()> {
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    let _ = retry_with_backoff(&config(0, 5), || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("down"))
        }
    })
    .await;

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    Ok(())
}

/// Test: Gaps between attempts grow with the backoff multiplier
#[tokio::test]
async fn test_backoff_spacing_grows() -> Result<()> {
    let start = Instant::now();
    let times = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let recorder = Arc::clone(&times);

    let _ = retry_with_backoff(&config(3, 50), || {
        let recorder = Arc::clone(&recorder);
        async move {
            recorder.lock().await.push(start.elapsed().as_millis());
            Err::<(), _>(anyhow!("unavailable"))
        }
    })
    .await;

    let times = times.lock().await;
    assert_eq!(times.len(), 3);

    let first_gap = times[1] - times[0];
    let second_gap = times[2] - times[1];
    assert!(first_gap >= 45, "first gap {}ms below jittered minimum", first_gap);
    assert!(second_gap >= 90, "second gap {}ms below jittered minimum", second_gap);
    Ok(())
}

/// Test: Consumer retry delays stay under the configured cap
#[test]
fn test_retry_delay_is_capped() {
    let config = RetryConfig {
        max_attempts: 10,
        initial_delay_ms: 1000,
        max_delay_ms: 60_000,
        backoff_multiplier: 2,
    };

    assert_eq!(config.base_delay_ms(1), 1000);
    assert_eq!(config.base_delay_ms(3), 4000);
    assert_eq!(config.base_delay_ms(10), 60_000);
    assert!(config.delay_for(10).as_millis() <= 66_000);
}
