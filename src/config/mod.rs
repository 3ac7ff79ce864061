//! Configuration for the session engine.

use crate::errors::{SessionError, SessionResult};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::transport::TransportConfig;
use crate::{
    DEFAULT_CIRCUIT_BREAKER_THRESHOLD, DEFAULT_DEVICE_ID, DEFAULT_MAX_RETRY_ATTEMPTS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use std::time::Duration;

/// Delay between deregistering and registering again in a forced re-registration.
pub const DEFAULT_REREGISTER_DELAY: Duration = Duration::from_secs(1);

/// Top-level configuration for a session orchestrator.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ask the connectivity monitor to connect as soon as initialization completes
    pub auto_reconnect: bool,
    /// Device identity sent with registration
    pub device_id: String,
    /// Pause between deregistration and registration in `force_reregister`
    pub reregister_delay: Duration,
    /// Retry, breaker and timeout settings for outbound calls
    pub transport: TransportConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            device_id: DEFAULT_DEVICE_ID.to_string(),
            reregister_delay: DEFAULT_REREGISTER_DELAY,
            transport: TransportConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a new configuration builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Creates a configuration from `RCS_*` environment variables.
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> SessionResult<Self> {
        let mut builder = Self::builder();

        if let Some(auto_reconnect) = env_var("RCS_AUTO_RECONNECT").and_then(|v| parse_bool(&v)) {
            builder = builder.auto_reconnect(auto_reconnect);
        }
        if let Some(device_id) = env_var("RCS_DEVICE_ID") {
            builder = builder.device_id(device_id);
        }

        let max_attempts = env_var("RCS_MAX_RETRY_ATTEMPTS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_RETRY_ATTEMPTS);
        let timeout_secs = env_var("RCS_REQUEST_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        let threshold = env_var("RCS_CIRCUIT_BREAKER_THRESHOLD")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_CIRCUIT_BREAKER_THRESHOLD);

        builder
            .max_retry_attempts(max_attempts)
            .request_timeout(Duration::from_secs(timeout_secs))
            .circuit_breaker_threshold(threshold)
            .build()
    }
}

/// Builder for EngineConfig
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    auto_reconnect: Option<bool>,
    device_id: Option<String>,
    reregister_delay: Option<Duration>,
    transport: Option<TransportConfig>,
    max_retry_attempts: Option<u32>,
    request_timeout: Option<Duration>,
    circuit_breaker_threshold: Option<u32>,
}

impl EngineConfigBuilder {
    pub fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = Some(auto_reconnect);
        self
    }

    pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    pub fn reregister_delay(mut self, delay: Duration) -> Self {
        self.reregister_delay = Some(delay);
        self
    }

    /// Replaces the whole transport configuration. The individual setters below still
    /// apply on top of it.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Total attempts per call, including the first
    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = Some(attempts);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn circuit_breaker_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_threshold = Some(threshold);
        self
    }

    /// Builds the configuration
    pub fn build(self) -> SessionResult<EngineConfig> {
        let mut transport = self.transport.unwrap_or_default();
        if let Some(attempts) = self.max_retry_attempts {
            transport.retry = RetryConfig {
                max_attempts: attempts,
                ..transport.retry
            };
        }
        if let Some(timeout) = self.request_timeout {
            transport.request_timeout = timeout;
        }
        if let Some(threshold) = self.circuit_breaker_threshold {
            transport.circuit_breaker = CircuitBreakerConfig {
                failure_threshold: threshold,
                ..transport.circuit_breaker
            };
        }

        if transport.retry.max_attempts == 0 {
            return Err(SessionError::Configuration {
                message: "max retry attempts must be at least 1".to_string(),
            });
        }
        if transport.circuit_breaker.failure_threshold == 0 {
            return Err(SessionError::Configuration {
                message: "circuit breaker threshold must be at least 1".to_string(),
            });
        }
        if transport.request_timeout.is_zero() {
            return Err(SessionError::Configuration {
                message: "request timeout must be non-zero".to_string(),
            });
        }

        let device_id = self
            .device_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE_ID.to_string());

        Ok(EngineConfig {
            auto_reconnect: self.auto_reconnect.unwrap_or(true),
            device_id,
            reregister_delay: self.reregister_delay.unwrap_or(DEFAULT_REREGISTER_DELAY),
            transport,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_defaults() {
        let config = EngineConfig::builder().build().unwrap();

        assert!(config.auto_reconnect);
        assert_eq!(config.device_id, DEFAULT_DEVICE_ID);
        assert_eq!(config.reregister_delay, Duration::from_secs(1));
        assert_eq!(config.transport.retry.max_attempts, DEFAULT_MAX_RETRY_ATTEMPTS);
        assert_eq!(
            config.transport.request_timeout,
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
        );
        assert_eq!(config.transport.circuit_breaker.failure_threshold, 5);
        assert_eq!(
            config.transport.circuit_breaker.reset_timeout,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_config_builder_custom() {
        let config = EngineConfig::builder()
            .auto_reconnect(false)
            .device_id("356938035643809")
            .reregister_delay(Duration::from_millis(250))
            .max_retry_attempts(5)
            .request_timeout(Duration::from_secs(10))
            .circuit_breaker_threshold(2)
            .build()
            .unwrap();

        assert!(!config.auto_reconnect);
        assert_eq!(config.device_id, "356938035643809");
        assert_eq!(config.reregister_delay, Duration::from_millis(250));
        assert_eq!(config.transport.retry.max_attempts, 5);
        assert_eq!(config.transport.request_timeout, Duration::from_secs(10));
        assert_eq!(config.transport.circuit_breaker.failure_threshold, 2);
    }

    #[test]
    fn test_config_builder_rejects_zero_attempts() {
        let err = EngineConfig::builder().max_retry_attempts(0).build().unwrap_err();
        assert!(matches!(err, SessionError::Configuration { .. }));

        let err = EngineConfig::builder()
            .circuit_breaker_threshold(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, SessionError::Configuration { .. }));
    }

    #[test]
    fn test_blank_device_id_uses_default() {
        let config = EngineConfig::builder().device_id("  ").build().unwrap();
        assert_eq!(config.device_id, DEFAULT_DEVICE_ID);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
