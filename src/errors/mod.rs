//! Error types for the session engine.
//!
//! Expected conditions (illegal transitions, rate limiting, circuit-open) are reported as
//! structured results by the components that produce them. `SessionError` covers the
//! remaining failures that cross collaborator and configuration boundaries.

mod categories;
mod error;

pub use categories::ErrorCategory;
pub use error::{SessionError, SessionResult};
