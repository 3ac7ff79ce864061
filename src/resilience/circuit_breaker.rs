use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time since the last failure after which one probe is let through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: crate::DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker state
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are blocked
    Open,
    /// Reset timeout elapsed; a single probe decides whether to close or reopen
    HalfOpen,
}

/// Outcome of asking the breaker for permission to call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CallPermission {
    /// Normal call
    Allowed,
    /// The one probing call of a half-open breaker
    Probe,
    /// Circuit is open; do not touch the network
    Rejected,
}

/// Snapshot of a breaker for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStatus {
    /// Current state
    pub state: CircuitState,
    /// True when calls are currently being rejected
    pub is_open: bool,
    /// Consecutive failures recorded since the last success
    pub failure_count: u32,
    /// When the most recent failure was recorded
    pub last_failure: Option<Instant>,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probe_started: Option<Instant>,
}

/// Consecutive-failure circuit breaker with a single-probe half-open phase.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker guarding `name`
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                probe_started: None,
            }),
        }
    }

    /// Name of the endpoint this breaker guards
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decide whether a call may proceed.
    ///
    /// An open breaker whose reset timeout has elapsed moves to half-open and hands out
    /// exactly one `Probe`; further callers are rejected until that probe reports back.
    pub fn acquire(&self) -> CallPermission {
        let mut inner = self.state.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => CallPermission::Allowed,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| now.duration_since(at) >= self.config.reset_timeout);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started = Some(now);
                    info!(endpoint = %self.name, "Circuit breaker half-open, allowing probe");
                    CallPermission::Probe
                } else {
                    CallPermission::Rejected
                }
            }
            CircuitState::HalfOpen => match inner.probe_started {
                // A probe that never reported back (caller dropped) must not wedge the breaker.
                Some(started) if now.duration_since(started) < self.config.reset_timeout => {
                    CallPermission::Rejected
                }
                _ => {
                    inner.probe_started = Some(now);
                    CallPermission::Probe
                }
            },
        }
    }

    /// Check if the circuit breaker is currently rejecting calls, without claiming a probe
    pub fn is_open(&self) -> bool {
        self.status().is_open
    }

    /// Get the current state of the circuit breaker
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Time left before an open breaker lets a probe through
    pub fn time_until_half_open(&self) -> Option<Duration> {
        let inner = self.state.lock();
        if inner.state != CircuitState::Open {
            return None;
        }
        let elapsed = inner
            .last_failure
            .map_or(self.config.reset_timeout, |at| at.elapsed());
        Some(self.config.reset_timeout.saturating_sub(elapsed))
    }

    /// Record a successful call; closes the circuit and clears the failure count
    pub fn record_success(&self) {
        let mut inner = self.state.lock();
        if inner.state != CircuitState::Closed {
            info!(endpoint = %self.name, "Circuit breaker closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.probe_started = None;
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.state.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.probe_started = None;

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!(
                    endpoint = %self.name,
                    failure_count = inner.failure_count,
                    "Circuit breaker probe failed, reopening"
                );
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                warn!(
                    endpoint = %self.name,
                    failure_count = inner.failure_count,
                    "Circuit breaker transitioning to OPEN"
                );
            }
            _ => {
                debug!(
                    endpoint = %self.name,
                    failure_count = inner.failure_count,
                    "Circuit breaker recorded failure"
                );
            }
        }
    }

    /// Snapshot for diagnostics
    pub fn status(&self) -> CircuitBreakerStatus {
        let inner = self.state.lock();
        let is_open = match inner.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => inner.probe_started.is_some(),
            CircuitState::Open => inner
                .last_failure
                .map_or(false, |at| at.elapsed() < self.config.reset_timeout),
        };
        CircuitBreakerStatus {
            state: inner.state,
            is_open,
            failure_count: inner.failure_count,
            last_failure: inner.last_failure,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.status();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &status.state)
            .field("failure_count", &status.failure_count)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "registrar.example",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout,
            },
        )
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let cb = CircuitBreaker::new("registrar.example", CircuitBreakerConfig::default());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());
        assert_eq!(cb.acquire(), CallPermission::Allowed);
    }

    #[test]
    fn test_circuit_breaker_opens_after_threshold() {
        let cb = breaker(3, Duration::from_secs(60));

        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
        assert_eq!(cb.acquire(), CallPermission::Rejected);
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let cb = breaker(3, Duration::from_secs(60));

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.status().failure_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_allows_single_probe() {
        let cb = breaker(2, Duration::from_millis(100));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.acquire(), CallPermission::Rejected);

        tokio::time::advance(Duration::from_millis(150)).await;

        assert_eq!(cb.acquire(), CallPermission::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.acquire(), CallPermission::Rejected);

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.acquire(), CallPermission::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let cb = breaker(2, Duration::from_millis(100));
        cb.record_failure();
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cb.acquire(), CallPermission::Probe);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.acquire(), CallPermission::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_is_replaced() {
        let cb = breaker(1, Duration::from_millis(100));
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cb.acquire(), CallPermission::Probe);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cb.acquire(), CallPermission::Probe);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_half_open() {
        let cb = breaker(2, Duration::from_millis(100));
        assert_eq!(cb.time_until_half_open(), None);

        cb.record_failure();
        cb.record_failure();

        let remaining = cb.time_until_half_open().unwrap();
        assert!(remaining <= Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(cb.time_until_half_open(), Some(Duration::ZERO));
    }
}
