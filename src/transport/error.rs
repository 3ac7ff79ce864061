//! Transport layer error types.

use std::error::Error as StdError;

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request or connect phase exceeded its timeout.
    #[error("Timeout")]
    Timeout,
    /// The host name could not be resolved.
    #[error("DNS resolution failed: {0}")]
    Dns(String),
    /// The peer reset the connection mid-exchange.
    #[error("Connection reset: {0}")]
    ConnectionReset(String),
    /// Any other connection failure (refused, TLS handshake, unreachable).
    #[error("Connection error: {0}")]
    Connection(String),
    /// The request could not be built or the response could not be read.
    #[error("Request error: {0}")]
    Request(String),
    /// The endpoint's circuit breaker is open; no I/O was attempted.
    #[error("Circuit breaker is open for {endpoint}")]
    CircuitOpen {
        /// Endpoint key the breaker guards
        endpoint: String,
    },
}

impl TransportError {
    /// Returns true for transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Dns(_) | TransportError::ConnectionReset(_)
        )
    }

    /// Returns true if this is a circuit-open fast failure.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, TransportError::CircuitOpen { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout;
        }

        let chain = error_chain(&err);
        let lowered = chain.to_ascii_lowercase();
        if lowered.contains("dns error") || lowered.contains("failed to lookup address") {
            TransportError::Dns(chain)
        } else if lowered.contains("connection reset") {
            TransportError::ConnectionReset(chain)
        } else if err.is_connect() {
            TransportError::Connection(chain)
        } else {
            TransportError::Request(chain)
        }
    }
}

/// Joins an error with its sources; reqwest hides the interesting part in the chain.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
