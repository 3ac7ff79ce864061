//! Structured logging and metrics for the session engine.
//!
//! All components log through `tracing`. [`LoggingConfig`] installs a subscriber with
//! pretty, compact or JSON output; hosts with their own subscriber can skip it.
//! Registration and provisioning outcomes are counted through [`MetricsCollector`].

mod logging;
mod metrics;

pub use logging::{log_request, log_response, LogFormat, LogLevel, LoggingConfig};
pub use metrics::{
    failure_reasons, metric_names, InMemoryMetricsCollector, MetricsCollector,
    NoopMetricsCollector,
};
