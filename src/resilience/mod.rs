//! Admission control and failure isolation.
//!
//! - [`RateLimiter`]: per-endpoint token bucket + sliding window with an adaptive multiplier
//! - [`CircuitBreaker`]: consecutive-failure breaker with a single-probe half-open phase
//! - [`RetryConfig`]: exponential backoff with jitter and the retryable status set

mod circuit_breaker;
mod rate_limiter;
mod retry;
mod sliding_window;
mod token_bucket;

#[cfg(test)]
mod tests;

pub use circuit_breaker::{
    CallPermission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus, CircuitState,
};
pub use rate_limiter::{
    standard_endpoint_configs, AdaptivePolicy, RateLimitConfig, RateLimitReason,
    RateLimitResult, RateLimitStatistics, RateLimiter, RateLimiterBuilder, REGISTER_ENDPOINT,
};
pub use retry::{is_retryable_status, RetryConfig, RETRYABLE_STATUS_CODES};
pub use sliding_window::{SlidingWindowCounter, SlidingWindowResult};
pub use token_bucket::{TokenBucket, TokenBucketResult};
