//! Prometheus-backed metrics sink
//!
//! Metric vectors are created and registered lazily the first time a name is
//! seen. The label names of that first sample fix the vector's schema; later
//! samples with a different label set are dropped with a warning instead of
//! panicking.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

use super::traits::MetricsCollector;

/// Histogram buckets for millisecond latencies and backoff delays
const LATENCY_BUCKETS_MS: &[f64] =
    &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0];

/// Exports engine metrics into a [`prometheus::Registry`]
pub struct PrometheusMetricsCollector {
    registry: Registry,
    namespace: Option<String>,
    counters: Mutex<HashMap<String, CounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

impl fmt::Debug for PrometheusMetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrometheusMetricsCollector")
            .field("namespace", &self.namespace)
            .field("counters", &self.counters.lock().len())
            .field("gauges", &self.gauges.lock().len())
            .field("histograms", &self.histograms.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for PrometheusMetricsCollector {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

impl PrometheusMetricsCollector {
    /// Create a collector registering into `registry`
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            namespace: None,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    /// Prefix every metric name with `namespace_`
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// The registry metrics are registered into
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn opts(&self, name: &str) -> Opts {
        let opts = Opts::new(name, format!("steadfast metric {name}"));
        match &self.namespace {
            Some(ns) => opts.namespace(ns.clone()),
            None => opts,
        }
    }

    fn register<C>(&self, name: &str, collector: &C) -> bool
    where
        C: prometheus::core::Collector + Clone + 'static,
    {
        match self.registry.register(Box::new(collector.clone())) {
            Ok(()) => true,
            Err(e) => {
                warn!(metric = name, error = %e, "failed to register prometheus metric");
                false
            }
        }
    }

    fn with_counter(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        f: impl FnOnce(&CounterVec, &[&str]),
    ) {
        let (keys, values) = split_labels(labels);
        let mut counters = self.counters.lock();
        if !counters.contains_key(name) {
            let vec = match CounterVec::new(self.opts(name), &keys) {
                Ok(vec) => vec,
                Err(e) => {
                    warn!(metric = name, error = %e, "invalid counter definition");
                    return;
                }
            };
            if !self.register(name, &vec) {
                return;
            }
            counters.insert(name.to_string(), vec);
        }
        if let Some(vec) = counters.get(name) {
            f(vec, &values);
        }
    }

    fn with_gauge(&self, name: &str, labels: &[(&str, &str)], f: impl FnOnce(&GaugeVec, &[&str])) {
        let (keys, values) = split_labels(labels);
        let mut gauges = self.gauges.lock();
        if !gauges.contains_key(name) {
            let vec = match GaugeVec::new(self.opts(name), &keys) {
                Ok(vec) => vec,
                Err(e) => {
                    warn!(metric = name, error = %e, "invalid gauge definition");
                    return;
                }
            };
            if !self.register(name, &vec) {
                return;
            }
            gauges.insert(name.to_string(), vec);
        }
        if let Some(vec) = gauges.get(name) {
            f(vec, &values);
        }
    }

    fn with_histogram(
        &self,
        name: &str,
        labels: &[(&str, &str)],
        f: impl FnOnce(&HistogramVec, &[&str]),
    ) {
        let (keys, values) = split_labels(labels);
        let mut histograms = self.histograms.lock();
        if !histograms.contains_key(name) {
            let opts = HistogramOpts::from(self.opts(name)).buckets(LATENCY_BUCKETS_MS.to_vec());
            let vec = match HistogramVec::new(opts, &keys) {
                Ok(vec) => vec,
                Err(e) => {
                    warn!(metric = name, error = %e, "invalid histogram definition");
                    return;
                }
            };
            if !self.register(name, &vec) {
                return;
            }
            histograms.insert(name.to_string(), vec);
        }
        if let Some(vec) = histograms.get(name) {
            f(vec, &values);
        }
    }
}

/// Sort labels by key so call sites may pass them in any order
fn split_labels<'a>(labels: &[(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
    let mut sorted = labels.to_vec();
    sorted.sort_by_key(|(k, _)| *k);
    sorted.into_iter().unzip()
}

impl MetricsCollector for PrometheusMetricsCollector {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.with_counter(name, labels, |vec, values| {
            match vec.get_metric_with_label_values(values) {
                Ok(counter) => counter.inc(),
                Err(e) => warn!(metric = name, error = %e, "dropping counter sample"),
            }
        });
    }

    fn record_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.with_gauge(name, labels, |vec, values| {
            match vec.get_metric_with_label_values(values) {
                Ok(gauge) => gauge.set(value),
                Err(e) => warn!(metric = name, error = %e, "dropping gauge sample"),
            }
        });
    }

    fn record_histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.with_histogram(name, labels, |vec, values| {
            match vec.get_metric_with_label_values(values) {
                Ok(histogram) => histogram.observe(value),
                Err(e) => warn!(metric = name, error = %e, "dropping histogram sample"),
            }
        });
    }
}
