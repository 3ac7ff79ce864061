//! Error types for the session engine.

use crate::errors::categories::ErrorCategory;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for session engine operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Main error type for the session engine.
///
/// Lower layers report expected conditions as typed results; this enum is what
/// collaborators and configuration loading return when something actually went wrong.
#[derive(Error, Debug, Clone)]
pub enum SessionError {
    /// Configuration error (invalid settings, unparsable environment values)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Network error (connectivity monitor failure, transport failure)
    #[error("Network error: {message}")]
    Network {
        /// Error message describing the network issue
        message: String,
        /// Whether the failure is transient
        retryable: bool,
    },

    /// Authentication error (credentials rejected by the remote service)
    #[error("Authentication error: {message}")]
    Authentication {
        /// Error message describing the authentication issue
        message: String,
    },

    /// The host denied a permission the engine needs
    #[error("Permission denied: {message}")]
    Permission {
        /// Error message naming the missing permission
        message: String,
    },

    /// Provisioning workflow failure
    #[error("Provisioning error: {message}")]
    Provisioning {
        /// Error message from the provisioning service
        message: String,
    },

    /// Registration failure
    #[error("Registration error: {message}")]
    Registration {
        /// Error message from the session client
        message: String,
        /// Status code reported by the registrar, if any
        status_code: Option<u16>,
    },

    /// Local admission control rejected the call
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Error message naming the endpoint
        message: String,
        /// How long to wait before retrying
        retry_after: Option<Duration>,
    },

    /// Operation is not legal in the current lifecycle state
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Error message naming the state and operation
        message: String,
    },

    /// Internal error (unexpected conditions, library bugs)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal issue
        message: String,
    },
}

impl SessionError {
    /// Returns true if the failure is transient and the operation may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Network { retryable, .. } => *retryable,
            SessionError::RateLimited { .. } => true,
            SessionError::Registration {
                status_code: Some(code),
                ..
            } => matches!(code, 408 | 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }

    /// Returns the retry-after duration if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SessionError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Category this error is reported under.
    pub fn category(&self) -> ErrorCategory {
        match self {
            SessionError::Network { .. } => ErrorCategory::Network,
            SessionError::Registration { .. } => ErrorCategory::Network,
            SessionError::Authentication { .. } => ErrorCategory::Security,
            SessionError::Permission { .. } => ErrorCategory::Permission,
            SessionError::InvalidState { .. } => ErrorCategory::State,
            SessionError::Configuration { .. } => ErrorCategory::Validation,
            SessionError::RateLimited { .. } => ErrorCategory::Resource,
            SessionError::Provisioning { .. } | SessionError::Internal { .. } => {
                ErrorCategory::Unknown
            }
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::CircuitOpen { .. } => SessionError::Network {
                message: err.to_string(),
                retryable: false,
            },
            other => SessionError::Network {
                retryable: other.is_retryable(),
                message: other.to_string(),
            },
        }
    }
}
