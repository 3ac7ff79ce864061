//! # RCS Session Engine
//!
//! Session lifecycle core for RCS/IMS clients that must establish and keep alive a
//! registered session with a remote messaging service over an unreliable network.
//!
//! ## Features
//!
//! - Auditable lifecycle state machine with a static transition table
//! - Per-endpoint admission control (token bucket + sliding window) with an adaptive
//!   multiplier driven by server overload signals
//! - Resilient HTTP transport: retry with exponential backoff and jitter, per-endpoint
//!   circuit breakers, request correlation ids
//! - Orchestrator that binds connectivity, provisioning and registration to the state machine
//! - Structured logging via `tracing` and pluggable registration metrics
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use integrations_rcs_session::{
//!     EngineConfig, RateLimiter, ResilientTransport, SessionOrchestrator,
//! };
//! # use integrations_rcs_session::Collaborators;
//! # fn collaborators() -> Collaborators { unimplemented!() }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::from_env()?;
//!
//!     // One limiter and one transport per process, shared by every session.
//!     let rate_limiter = Arc::new(RateLimiter::new());
//!     let transport = Arc::new(ResilientTransport::from_config(&config.transport)?);
//!
//!     let orchestrator =
//!         SessionOrchestrator::new(config, collaborators(), rate_limiter, transport);
//!     orchestrator.initialize().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `state` - Lifecycle states, events and the transition machine
//! - `resilience` - Rate limiter, circuit breaker and retry policy
//! - `transport` - HTTP transport abstraction and the resilient execution path
//! - `orchestrator` - Collaborator traits and the session orchestrator
//! - `config` - Engine configuration and builder
//! - `errors` - Error types and taxonomy
//! - `observability` - Logging setup, request/response log helpers and metrics
//! - `mocks` - Mock collaborators for testing

#![warn(clippy::all)]

pub mod config;
pub mod errors;
pub mod observability;
pub mod orchestrator;
pub mod resilience;
pub mod state;
pub mod transport;

#[cfg(test)]
pub mod mocks;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use errors::{ErrorCategory, SessionError, SessionResult};
pub use observability::{
    InMemoryMetricsCollector, LogFormat, LogLevel, LoggingConfig, MetricsCollector,
    NoopMetricsCollector,
};
pub use orchestrator::{
    BroadcastNotifier, Collaborators, ConnectivityListener, ConnectivityMonitor,
    InMemorySessionRegistry, NotificationSink, ProtocolSessionClient, ProvisioningService,
    SessionClientFactory, SessionNotification, SessionOrchestrator, SessionRegistry,
};
pub use resilience::{
    AdaptivePolicy, CircuitBreaker, CircuitBreakerConfig, CircuitState, RateLimitConfig,
    RateLimitReason, RateLimitResult, RateLimitStatistics, RateLimiter, RetryConfig,
};
pub use state::{SessionEvent, SessionState, StateMachine, TransitionResult};
pub use transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpResult, HttpTransport, ReqwestTransport,
    ResilientTransport, TransportConfig, TransportError,
};

/// Client version advertised in the `X-Client-Version` header
pub const CLIENT_VERSION: &str = concat!("rcs-session/", env!("CARGO_PKG_VERSION"));

/// Device id used when the host does not supply one
pub const DEFAULT_DEVICE_ID: &str = "0000000000000000";

/// The default connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// The default overall request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// The default total number of attempts per request
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;

/// Consecutive failures before a circuit breaker opens
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
