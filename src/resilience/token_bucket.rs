//! Lazily refilled token bucket.

use parking_lot::Mutex;
use tokio::time::Instant;

/// Outcome of a bucket withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketResult {
    /// True if the tokens were withdrawn
    pub is_allowed: bool,
    /// Whole tokens left after the call
    pub remaining_tokens: u32,
    /// Milliseconds until enough tokens will have accumulated; zero when allowed
    pub retry_after_ms: u64,
}

struct BucketState {
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

/// Token bucket refilled on access from elapsed monotonic time.
///
/// The token count is kept within `[0, capacity]` at every observation point.
pub struct TokenBucket {
    capacity: u32,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(refill_rate: f64, capacity: u32) -> Self {
        Self {
            capacity,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                refill_rate: refill_rate.max(0.0),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Withdraw `requested` tokens if available
    pub fn try_consume(&self, requested: u32) -> TokenBucketResult {
        let mut state = self.state.lock();
        self.refill(&mut state);

        let requested = requested as f64;
        if state.tokens >= requested {
            state.tokens -= requested;
            return TokenBucketResult {
                is_allowed: true,
                remaining_tokens: state.tokens as u32,
                retry_after_ms: 0,
            };
        }

        let needed = requested - state.tokens;
        let retry_after_ms = if state.refill_rate > 0.0 {
            (needed / state.refill_rate * 1000.0).ceil() as u64
        } else {
            u64::MAX
        };

        TokenBucketResult {
            is_allowed: false,
            remaining_tokens: state.tokens as u32,
            retry_after_ms,
        }
    }

    /// Return previously withdrawn tokens, never exceeding capacity
    pub fn refund(&self, tokens: u32) {
        let mut state = self.state.lock();
        state.tokens = (state.tokens + tokens as f64).min(self.capacity as f64);
    }

    /// Current token count after refill
    pub fn current_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.state.lock().refill_rate
    }

    /// Change the refill rate; tokens accrued so far are credited at the old rate
    pub fn set_refill_rate(&self, refill_rate: f64) {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.refill_rate = refill_rate.max(0.0);
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * state.refill_rate).min(self.capacity as f64);
        state.last_refill = now;
    }
}
