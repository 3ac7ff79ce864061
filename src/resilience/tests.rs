//! Cross-component tests for the admission control layer

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_bucket_stays_within_bounds_over_mixed_sequence() {
    let bucket = TokenBucket::new(3.0, 5);

    for step in 0..200u32 {
        match step % 4 {
            0 => {
                bucket.try_consume(step % 7);
            }
            1 => bucket.refund(step % 3),
            2 => tokio::time::advance(Duration::from_millis(u64::from(step % 5) * 130)).await,
            _ => {
                bucket.try_consume(1);
            }
        }

        let tokens = bucket.current_tokens();
        assert!(tokens >= 0.0, "tokens went negative at step {step}: {tokens}");
        assert!(tokens <= 5.0, "tokens exceeded capacity at step {step}: {tokens}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_window_never_grants_more_than_cap_in_any_interval() {
    let window_len = Duration::from_millis(1000);
    let limiter = RateLimiter::builder()
        .endpoint("burst", RateLimitConfig::new(1000.0, 1000, window_len, 4))
        .build();

    let start = tokio::time::Instant::now();
    let mut grants = Vec::new();
    for _ in 0..60 {
        if limiter.try_acquire_one("burst").is_allowed {
            grants.push(start.elapsed());
        }
        tokio::time::advance(Duration::from_millis(70)).await;
    }

    assert!(!grants.is_empty());
    for (i, first) in grants.iter().enumerate() {
        let in_window = grants[i..]
            .iter()
            .take_while(|at| **at - *first <= window_len)
            .count();
        assert!(in_window <= 4, "{in_window} grants within one window starting at {first:?}");
    }
}

#[test]
fn test_rejected_window_leaves_token_count_unchanged() {
    let limiter = RateLimiter::builder()
        .endpoint("capped", RateLimitConfig::new(0.0, 20, Duration::from_secs(60), 3))
        .build();

    for _ in 0..3 {
        assert!(limiter.try_acquire("capped", 2).is_allowed);
    }

    let before = limiter.statistics("capped").current_tokens;
    let result = limiter.try_acquire("capped", 5);
    let after = limiter.statistics("capped").current_tokens;

    assert_eq!(result.reason, RateLimitReason::SlidingWindowExceeded);
    assert_eq!(before, after);
}

#[test]
fn test_concurrent_acquisitions_respect_capacity() {
    let limiter = Arc::new(
        RateLimiter::builder()
            .endpoint("shared", RateLimitConfig::new(0.0, 25, Duration::from_secs(60), 1000))
            .build(),
    );
    let granted = Arc::new(AtomicU32::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let granted = Arc::clone(&granted);
            std::thread::spawn(move || {
                for _ in 0..10 {
                    if limiter.try_acquire_one("shared").is_allowed {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(granted.load(Ordering::SeqCst), 25);
    assert_eq!(limiter.statistics("shared").window_request_count, 25);
}

#[test]
fn test_endpoints_are_independent() {
    let limiter = RateLimiter::new();

    for _ in 0..3 {
        assert!(limiter.try_acquire_one(REGISTER_ENDPOINT).is_allowed);
    }
    assert!(!limiter.try_acquire_one(REGISTER_ENDPOINT).is_allowed);

    assert!(limiter.try_acquire_one("message").is_allowed);
    limiter.record_server_response(REGISTER_ENDPOINT, 429, 20);
    assert_eq!(limiter.adaptive_multiplier("message"), 1.0);
}

#[test]
fn test_backoff_sequence_is_monotonic_without_jitter() {
    let config = RetryConfig {
        jitter: 0.0,
        ..Default::default()
    };

    let delays: Vec<_> = (1..=6).map(|attempt| config.backoff(attempt)).collect();
    assert_eq!(delays[0], Duration::from_millis(2000));
    assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(*delays.last().unwrap(), Duration::from_millis(30_000));
}
