//! Coarse error classification used for logging and health reporting.

use std::fmt;

/// Category an error is reported under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connectivity, DNS, timeouts, remote failures
    Network,
    /// Authentication and credential problems
    Security,
    /// Missing host permissions
    Permission,
    /// Operation attempted in the wrong lifecycle state
    State,
    /// Invalid configuration or input
    Validation,
    /// Local resource exhaustion, including admission control
    Resource,
    /// Anything not otherwise classified
    Unknown,
}

impl ErrorCategory {
    /// Stable lowercase name, suitable as a log field value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Security => "security",
            ErrorCategory::Permission => "permission",
            ErrorCategory::State => "state",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
