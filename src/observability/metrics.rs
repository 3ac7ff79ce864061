//! Counters and histograms for the registration lifecycle.
//!
//! The orchestrator reports through [`MetricsCollector`]; hosts plug in their own exporter
//! or use [`InMemoryMetricsCollector`] to read values back directly.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sink for engine metrics. Labels are `(key, value)` pairs.
pub trait MetricsCollector: Send + Sync {
    fn increment_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]);

    /// Record one observation, e.g. a latency in milliseconds.
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Collector that keeps every metric in process memory.
///
/// Series are keyed as `name` or `name:k1=v1,k2=v2` with labels in the order given.
#[derive(Default)]
pub struct InMemoryMetricsCollector {
    counters: RwLock<HashMap<String, AtomicU64>>,
    histograms: RwLock<HashMap<String, Vec<f64>>>,
    gauges: RwLock<HashMap<String, f64>>,
}

impl InMemoryMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current counter value; zero for an unknown series.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .get(&series_key(name, labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum of a counter across all of its label sets.
    pub fn counter_total(&self, name: &str) -> u64 {
        let prefix = format!("{}:", name);
        self.counters
            .read()
            .iter()
            .filter(|(key, _)| key.as_str() == name || key.starts_with(&prefix))
            .map(|(_, c)| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Observations in recording order.
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
        self.histograms
            .read()
            .get(&series_key(name, labels))
            .cloned()
            .unwrap_or_default()
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges.read().get(&series_key(name, labels)).copied()
    }

    pub fn reset(&self) {
        self.counters.write().clear();
        self.histograms.write().clear();
        self.gauges.write().clear();
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn increment_counter(&self, name: &str, value: u64, labels: &[(&str, &str)]) {
        let key = series_key(name, labels);
        if let Some(counter) = self.counters.read().get(&key) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        self.counters
            .write()
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.histograms
            .write()
            .entry(series_key(name, labels))
            .or_default()
            .push(value);
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.gauges.write().insert(series_key(name, labels), value);
    }
}

impl std::fmt::Debug for InMemoryMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetricsCollector")
            .field("counters", &self.counters.read().len())
            .field("histograms", &self.histograms.read().len())
            .field("gauges", &self.gauges.read().len())
            .finish()
    }
}

/// Collector that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn increment_counter(&self, _name: &str, _value: u64, _labels: &[(&str, &str)]) {}
    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let labels: Vec<String> = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}:{}", name, labels.join(","))
}

/// Metric names reported by the orchestrator.
pub mod metric_names {
    /// Registration workflows started
    pub const REGISTRATION_ATTEMPTS: &str = "rcs.registration.attempts";

    /// Registrations that reached `Registered`
    pub const REGISTRATION_SUCCESS: &str = "rcs.registration.success";

    /// Failed registration workflows, labelled by `reason`
    pub const REGISTRATION_FAILURES: &str = "rcs.registration.failures";

    /// Time spent in the REGISTER exchange, retries included, in milliseconds
    pub const REGISTRATION_DURATION_MS: &str = "rcs.registration.duration_ms";

    /// Provisioning runs started
    pub const PROVISIONING_ATTEMPTS: &str = "rcs.provisioning.attempts";

    /// Provisioning runs that succeeded
    pub const PROVISIONING_SUCCESS: &str = "rcs.provisioning.success";

    /// Provisioning runs that failed
    pub const PROVISIONING_FAILURES: &str = "rcs.provisioning.failures";
}

/// Values of the `reason` label on [`metric_names::REGISTRATION_FAILURES`].
pub mod failure_reasons {
    pub const MISSING_CONFIG: &str = "missing_config";
    pub const CONNECT_FAILED: &str = "connect_failed";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const REJECTED: &str = "rejected";
}
