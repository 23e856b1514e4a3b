//! In-process metrics sink for tests and inspection

use std::collections::HashMap;

use parking_lot::Mutex;

use super::traits::MetricsCollector;

type Labels = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    labels: Labels,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Labels =
            labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        labels.sort();
        Self { name: name.to_string(), labels }
    }

    fn matches(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        self.name == name
            && labels.iter().all(|(k, v)| self.labels.iter().any(|(lk, lv)| lk == k && lv == v))
    }
}

/// Metrics collector that keeps every series in memory
///
/// Lookups take a label *subset*: `counter("retry_failure", &[("reason",
/// "exhausted")])` sums every series named `retry_failure` whose labels
/// include `reason=exhausted`.
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    counters: Mutex<HashMap<SeriesKey, u64>>,
    gauges: Mutex<HashMap<SeriesKey, f64>>,
    histograms: Mutex<HashMap<SeriesKey, Vec<f64>>>,
}

impl InMemoryMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every counter series matching `name` and the label subset
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .lock()
            .iter()
            .filter(|(key, _)| key.matches(name, labels))
            .map(|(_, value)| *value)
            .sum()
    }

    /// Last value of the first gauge series matching `name` and the label subset
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges
            .lock()
            .iter()
            .find(|(key, _)| key.matches(name, labels))
            .map(|(_, value)| *value)
    }

    /// Every observation of matching histogram series
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Vec<f64> {
        self.histograms
            .lock()
            .iter()
            .filter(|(key, _)| key.matches(name, labels))
            .flat_map(|(_, values)| values.iter().copied())
            .collect()
    }

    /// Drop every recorded series
    pub fn clear(&self) {
        self.counters.lock().clear();
        self.gauges.lock().clear();
        self.histograms.lock().clear();
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        *self.counters.lock().entry(SeriesKey::new(name, labels)).or_insert(0) += 1;
    }

    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.gauges.lock().insert(SeriesKey::new(name, labels), value);
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.histograms.lock().entry(SeriesKey::new(name, labels)).or_default().push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates counters are summed across series matching a label subset.
    ///
    /// Assertions:
    /// - Confirms an empty label filter sums every series of the name
    /// - Confirms a label filter selects only matching series
    /// - Confirms label order does not create distinct series
    #[test]
    fn test_counter_label_subset() {
        let metrics = InMemoryMetricsCollector::new();
        metrics.increment_counter("retry_failure", &[("scope", "a"), ("reason", "exhausted")]);
        metrics.increment_counter("retry_failure", &[("reason", "exhausted"), ("scope", "a")]);
        metrics.increment_counter("retry_failure", &[("scope", "a"), ("reason", "timeout")]);

        assert_eq!(metrics.counter("retry_failure", &[]), 3);
        assert_eq!(metrics.counter("retry_failure", &[("reason", "exhausted")]), 2);
        assert_eq!(metrics.counter("retry_failure", &[("reason", "cancelled")]), 0);
        assert_eq!(metrics.counter("retry_success", &[]), 0);
    }

    /// Validates gauges keep the last value and histograms keep every sample.
    #[test]
    fn test_gauge_and_histogram() {
        let metrics = InMemoryMetricsCollector::new();
        metrics.record_gauge("active_retries", 2.0, &[("scope", "s")]);
        metrics.record_gauge("active_retries", 1.0, &[("scope", "s")]);
        assert_eq!(metrics.gauge("active_retries", &[("scope", "s")]), Some(1.0));
        assert_eq!(metrics.gauge("active_retries", &[("scope", "other")]), None);

        metrics.record_histogram("retry_latency", 5.0, &[("scope", "s")]);
        metrics.record_timing("retry_latency", 7, &[("scope", "s")]);
        let mut samples = metrics.histogram("retry_latency", &[]);
        samples.sort_by(f64::total_cmp);
        assert_eq!(samples, vec![5.0, 7.0]);

        metrics.clear();
        assert!(metrics.histogram("retry_latency", &[]).is_empty());
    }
}
