use super::sliding_window::SlidingWindowCounter;
use super::token_bucket::TokenBucket;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Endpoint name used by the registration workflow
pub const REGISTER_ENDPOINT: &str = "register";

/// Configuration for one endpoint's admission control
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Token bucket refill rate
    pub tokens_per_second: f64,
    /// Token bucket burst size
    pub bucket_capacity: u32,
    /// Trailing window length of the sliding window counter
    pub sliding_window: Duration,
    /// Grants allowed within one window
    pub max_requests_per_window: u32,
}

impl RateLimitConfig {
    /// Create a config
    pub const fn new(
        tokens_per_second: f64,
        bucket_capacity: u32,
        sliding_window: Duration,
        max_requests_per_window: u32,
    ) -> Self {
        Self {
            tokens_per_second,
            bucket_capacity,
            sliding_window,
            max_requests_per_window,
        }
    }

    /// Scale refill rate and window cap by an adaptive multiplier.
    ///
    /// The window cap never drops below one request.
    pub fn with_multiplier(&self, multiplier: f64) -> Self {
        Self {
            tokens_per_second: self.tokens_per_second * multiplier,
            max_requests_per_window: ((self.max_requests_per_window as f64 * multiplier) as u32)
                .max(1),
            ..self.clone()
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(10.0, 50, Duration::from_secs(60), 100)
    }
}

/// Built-in per-endpoint configurations.
///
/// Registration is rare and expensive for the registrar; messaging is frequent.
pub fn standard_endpoint_configs() -> HashMap<String, RateLimitConfig> {
    [
        (REGISTER_ENDPOINT, RateLimitConfig::new(0.1, 3, Duration::from_secs(300), 5)),
        ("capabilities", RateLimitConfig::new(5.0, 20, Duration::from_secs(60), 50)),
        ("message", RateLimitConfig::new(2.0, 30, Duration::from_secs(60), 60)),
        ("fileTransfer", RateLimitConfig::new(0.5, 5, Duration::from_secs(60), 10)),
        ("presence", RateLimitConfig::new(1.0, 10, Duration::from_secs(60), 30)),
    ]
    .into_iter()
    .map(|(name, config)| (name.to_string(), config))
    .collect()
}

/// How server responses move the adaptive multiplier
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptivePolicy {
    /// Factor applied on HTTP 429
    pub too_many_requests_factor: f64,
    /// Factor applied on HTTP 503
    pub unavailable_factor: f64,
    /// Factor applied on a fast 2xx
    pub recovery_factor: f64,
    /// A 2xx faster than this counts as a health signal
    pub fast_response_threshold: Duration,
    /// Lower bound of the multiplier
    pub min_multiplier: f64,
    /// Upper bound of the multiplier
    pub max_multiplier: f64,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            too_many_requests_factor: 0.5,
            unavailable_factor: 0.7,
            recovery_factor: 1.1,
            fast_response_threshold: Duration::from_millis(500),
            min_multiplier: 0.1,
            max_multiplier: 1.0,
        }
    }
}

impl AdaptivePolicy {
    /// Next multiplier after observing `status` in `response_time`, or `None` if the
    /// response carries no signal.
    pub fn adjust(&self, current: f64, status: u16, response_time: Duration) -> Option<f64> {
        let factor = match status {
            429 => self.too_many_requests_factor,
            503 => self.unavailable_factor,
            200..=299 if response_time < self.fast_response_threshold => {
                if current >= self.max_multiplier {
                    return None;
                }
                self.recovery_factor
            }
            _ => return None,
        };
        Some((current * factor).clamp(self.min_multiplier, self.max_multiplier))
    }
}

/// Why a request was admitted or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// Both guards passed
    Allowed,
    /// Not enough tokens in the bucket
    TokenBucketExhausted,
    /// Window already holds its maximum number of grants
    SlidingWindowExceeded,
}

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    /// True if the caller may proceed
    pub is_allowed: bool,
    /// How long to wait before trying again; zero when allowed
    pub retry_after_ms: u64,
    /// Tokens left in the bucket, or grants left in the window for window rejections
    pub remaining_tokens: u32,
    /// Which guard decided
    pub reason: RateLimitReason,
}

impl RateLimitResult {
    /// `retry_after_ms` as a duration
    pub fn retry_after(&self) -> Duration {
        Duration::from_millis(self.retry_after_ms)
    }
}

/// Per-endpoint snapshot for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitStatistics {
    pub endpoint: String,
    pub current_tokens: f64,
    pub bucket_capacity: u32,
    pub window_request_count: u32,
    pub window_max_requests: u32,
    pub adaptive_multiplier: f64,
}

struct EndpointLimiter {
    bucket: TokenBucket,
    window: SlidingWindowCounter,
}

impl EndpointLimiter {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            bucket: TokenBucket::new(config.tokens_per_second, config.bucket_capacity),
            window: SlidingWindowCounter::new(
                config.sliding_window,
                config.max_requests_per_window,
            ),
        }
    }

    fn apply(&self, config: &RateLimitConfig) {
        self.bucket.set_refill_rate(config.tokens_per_second);
        self.window.set_max_requests(config.max_requests_per_window);
    }
}

/// Per-endpoint token bucket plus sliding window, with an adaptive multiplier.
///
/// Endpoint state is created lazily on first use. The map lock is only held for lookup and
/// insertion; each bucket and window carries its own lock, so endpoints do not contend.
pub struct RateLimiter {
    default_config: RateLimitConfig,
    endpoint_configs: HashMap<String, RateLimitConfig>,
    policy: AdaptivePolicy,
    limiters: RwLock<HashMap<String, Arc<EndpointLimiter>>>,
    multipliers: RwLock<HashMap<String, f64>>,
}

impl RateLimiter {
    /// Create a rate limiter with the built-in endpoint table
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for custom endpoint tables or adaptive policy
    pub fn builder() -> RateLimiterBuilder {
        RateLimiterBuilder::new()
    }

    /// Admit `tokens` units of work against `endpoint`.
    ///
    /// The bucket is consulted first. If it allows but the window rejects, the withdrawn
    /// tokens are refunded so a rejected call never consumes bucket capacity.
    pub fn try_acquire(&self, endpoint: &str, tokens: u32) -> RateLimitResult {
        let limiter = self.limiter_for(endpoint);

        let bucket_result = limiter.bucket.try_consume(tokens);
        if !bucket_result.is_allowed {
            warn!(
                endpoint = %endpoint,
                retry_after_ms = bucket_result.retry_after_ms,
                reason = "token_bucket_exhausted",
                "Rate limit exceeded"
            );
            return RateLimitResult {
                is_allowed: false,
                retry_after_ms: bucket_result.retry_after_ms,
                remaining_tokens: bucket_result.remaining_tokens,
                reason: RateLimitReason::TokenBucketExhausted,
            };
        }

        let window_result = limiter.window.try_increment();
        if !window_result.is_allowed {
            limiter.bucket.refund(tokens);
            warn!(
                endpoint = %endpoint,
                retry_after_ms = window_result.retry_after_ms,
                reason = "sliding_window_exceeded",
                "Rate limit exceeded"
            );
            return RateLimitResult {
                is_allowed: false,
                retry_after_ms: window_result.retry_after_ms,
                remaining_tokens: window_result.remaining_in_window,
                reason: RateLimitReason::SlidingWindowExceeded,
            };
        }

        debug!(
            endpoint = %endpoint,
            remaining_tokens = bucket_result.remaining_tokens,
            "Rate limit acquired"
        );
        RateLimitResult {
            is_allowed: true,
            retry_after_ms: 0,
            remaining_tokens: bucket_result.remaining_tokens,
            reason: RateLimitReason::Allowed,
        }
    }

    /// Admit a single unit of work
    pub fn try_acquire_one(&self, endpoint: &str) -> RateLimitResult {
        self.try_acquire(endpoint, 1)
    }

    /// Feed an observed server response into the endpoint's adaptive multiplier.
    ///
    /// 429 and 503 shrink the multiplier, fast 2xx responses grow it back. The new
    /// multiplier is applied to the endpoint's bucket rate and window cap immediately.
    pub fn record_server_response(&self, endpoint: &str, status: u16, response_time_ms: u64) {
        let response_time = Duration::from_millis(response_time_ms);
        let updated = {
            let mut multipliers = self.multipliers.write();
            let current = multipliers.get(endpoint).copied().unwrap_or(1.0);
            let Some(next) = self.policy.adjust(current, status, response_time) else {
                return;
            };
            multipliers.insert(endpoint.to_string(), next);
            next
        };

        if status == 429 || status == 503 {
            warn!(
                endpoint = %endpoint,
                status,
                multiplier = updated,
                "Server signalled overload, reducing rate"
            );
        } else {
            debug!(endpoint = %endpoint, multiplier = updated, "Fast response, increasing rate");
        }

        let existing = self.limiters.read().get(endpoint).cloned();
        if let Some(limiter) = existing {
            limiter.apply(&self.config_for(endpoint).with_multiplier(updated));
        }
    }

    /// Current adaptive multiplier for an endpoint
    pub fn adaptive_multiplier(&self, endpoint: &str) -> f64 {
        self.multipliers.read().get(endpoint).copied().unwrap_or(1.0)
    }

    /// Snapshot of an endpoint; zeroed counters if it has never been used
    pub fn statistics(&self, endpoint: &str) -> RateLimitStatistics {
        let limiter = self.limiters.read().get(endpoint).cloned();
        RateLimitStatistics {
            endpoint: endpoint.to_string(),
            current_tokens: limiter.as_ref().map_or(0.0, |l| l.bucket.current_tokens()),
            bucket_capacity: limiter.as_ref().map_or(0, |l| l.bucket.capacity()),
            window_request_count: limiter.as_ref().map_or(0, |l| l.window.current_count()),
            window_max_requests: limiter.as_ref().map_or(0, |l| l.window.max_requests()),
            adaptive_multiplier: self.adaptive_multiplier(endpoint),
        }
    }

    /// Forget all state for one endpoint
    pub fn reset(&self, endpoint: &str) {
        self.limiters.write().remove(endpoint);
        self.multipliers.write().remove(endpoint);
        info!(endpoint = %endpoint, "Rate limiter reset");
    }

    /// Forget all state for every endpoint
    pub fn reset_all(&self) {
        self.limiters.write().clear();
        self.multipliers.write().clear();
        info!("Rate limiter reset for all endpoints");
    }

    /// Base configuration for an endpoint, before the adaptive multiplier
    pub fn config_for(&self, endpoint: &str) -> &RateLimitConfig {
        self.endpoint_configs
            .get(endpoint)
            .unwrap_or(&self.default_config)
    }

    fn limiter_for(&self, endpoint: &str) -> Arc<EndpointLimiter> {
        if let Some(limiter) = self.limiters.read().get(endpoint) {
            return Arc::clone(limiter);
        }

        let config = self
            .config_for(endpoint)
            .with_multiplier(self.adaptive_multiplier(endpoint));
        let mut limiters = self.limiters.write();
        Arc::clone(
            limiters
                .entry(endpoint.to_string())
                .or_insert_with(|| Arc::new(EndpointLimiter::new(&config))),
        )
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_config", &self.default_config)
            .field("endpoints", &self.limiters.read().len())
            .field("policy", &self.policy)
            .finish()
    }
}

/// Builder for configuring a rate limiter
pub struct RateLimiterBuilder {
    default_config: RateLimitConfig,
    endpoint_configs: HashMap<String, RateLimitConfig>,
    policy: AdaptivePolicy,
}

impl RateLimiterBuilder {
    /// Create a builder seeded with the built-in endpoint table
    pub fn new() -> Self {
        Self {
            default_config: RateLimitConfig::default(),
            endpoint_configs: standard_endpoint_configs(),
            policy: AdaptivePolicy::default(),
        }
    }

    /// Set the configuration used for endpoints without an override
    pub fn default_config(mut self, config: RateLimitConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Add or replace an endpoint override
    pub fn endpoint(mut self, endpoint: impl Into<String>, config: RateLimitConfig) -> Self {
        self.endpoint_configs.insert(endpoint.into(), config);
        self
    }

    /// Set the adaptive policy
    pub fn policy(mut self, policy: AdaptivePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the rate limiter
    pub fn build(self) -> RateLimiter {
        RateLimiter {
            default_config: self.default_config,
            endpoint_configs: self.endpoint_configs,
            policy: self.policy,
            limiters: RwLock::new(HashMap::new()),
            multipliers: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
