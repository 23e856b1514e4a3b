//! Metrics collaborator trait
//!
//! The engine reports counters, gauges and histograms through
//! [`MetricsCollector`] without depending on a concrete metrics backend.

use std::fmt::Debug;

/// Trait for metrics collection implementations
///
/// Allows components to emit metrics without depending on a specific
/// metrics collection system. Implementations must tolerate arbitrary label
/// sets and must never panic.
pub trait MetricsCollector: Send + Sync + Debug {
    /// Record a counter metric
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    /// Record a gauge metric
    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record a histogram metric
    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Record timing metric (in milliseconds)
    fn record_timing(&self, name: &str, duration_ms: u64, labels: &[(&str, &str)]) {
        #[allow(clippy::cast_precision_loss)]
        self.record_histogram(name, duration_ms as f64, labels);
    }
}

/// Metrics collector that discards every sample
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetricsCollector;

impl MetricsCollector for NoOpMetricsCollector {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn record_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}

    fn record_histogram(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}
