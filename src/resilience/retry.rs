use std::time::Duration;

/// HTTP statuses that are worth another attempt
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter, as a fraction of the computed delay
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_RETRY_ATTEMPTS,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter: 0.3,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the next attempt, given how many attempts have been made.
    ///
    /// `min(max_delay, initial_delay * multiplier^attempts + jitter)` where jitter is drawn
    /// uniformly from `[0, jitter * base)`.
    pub fn backoff(&self, attempts_made: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempts_made as i32);
        let jitter_ms = rand::random::<f64>() * self.jitter.max(0.0) * base_ms;
        let delay_ms = (base_ms + jitter_ms).min(self.max_delay.as_millis() as f64);

        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    /// True if another attempt is allowed after `attempts_made` attempts
    pub fn has_attempts_left(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }
}

/// True for statuses the transport retries
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}
