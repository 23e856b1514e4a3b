//! Aggregate retry statistics shared across every key of an executor

use std::fmt;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

/// Aggregate counters across all operations run by one executor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryStats {
    /// Retries scheduled (failed attempts followed by a backoff wait)
    pub retry_attempts: u64,
    /// Operations that eventually succeeded
    pub retry_successes: u64,
    /// Operations that terminated with an error
    pub retry_failures: u64,
    /// Failed attempts since the last success
    pub consecutive_failures: u64,
    pub last_retry_time: Option<SystemTime>,
    /// Rolling mean of successful execution latency
    pub avg_retry_latency: Duration,
    pub max_retry_latency: Duration,
    /// `successes / (successes + failures)`, 0.0 before any outcome
    pub success_rate: f64,
}

impl RetryStats {
    /// Operations that reached a terminal outcome
    pub fn total_operations(&self) -> u64 {
        self.retry_successes + self.retry_failures
    }

    #[allow(clippy::cast_precision_loss)]
    fn recompute_success_rate(&mut self) {
        let total = self.total_operations();
        self.success_rate =
            if total == 0 { 0.0 } else { self.retry_successes as f64 / total as f64 };
    }
}

impl fmt::Display for RetryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RetryStats {{ retries: {}, successes: {}, failures: {}, consecutive_failures: {}, \
             avg_latency: {:?}, max_latency: {:?}, success_rate: {:.3} }}",
            self.retry_attempts,
            self.retry_successes,
            self.retry_failures,
            self.consecutive_failures,
            self.avg_retry_latency,
            self.max_retry_latency,
            self.success_rate
        )
    }
}

/// Lock-guarded [`RetryStats`] updated by the executor
///
/// Readers take a cloned snapshot; the lock is never held across an await.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    stats: Mutex<RetryStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A failed attempt that will be retried after a backoff wait
    pub fn record_retry(&self, at: SystemTime) {
        let mut stats = self.stats.lock();
        stats.retry_attempts += 1;
        stats.consecutive_failures += 1;
        stats.last_retry_time = Some(at);
    }

    /// A failed attempt that ends the operation
    pub fn record_failure(&self) {
        let mut stats = self.stats.lock();
        stats.retry_failures += 1;
        stats.consecutive_failures += 1;
        stats.recompute_success_rate();
    }

    /// A terminal outcome reached without a failed attempt of its own
    /// (cancellation or deadline before the next attempt)
    pub fn record_abandoned(&self) {
        let mut stats = self.stats.lock();
        stats.retry_failures += 1;
        stats.recompute_success_rate();
    }

    /// An operation succeeded after `latency` of total execution time
    pub fn record_success(&self, latency: Duration) {
        let mut stats = self.stats.lock();
        stats.retry_successes += 1;
        stats.consecutive_failures = 0;

        // Incremental mean over successful operations
        let n = u32::try_from(stats.retry_successes).unwrap_or(u32::MAX);
        let prev = stats.avg_retry_latency;
        stats.avg_retry_latency = if latency >= prev {
            prev + (latency - prev) / n
        } else {
            prev - (prev - latency) / n
        };
        stats.max_retry_latency = stats.max_retry_latency.max(latency);
        stats.recompute_success_rate();
    }

    /// Cloned snapshot of the current counters
    pub fn snapshot(&self) -> RetryStats {
        self.stats.lock().clone()
    }

    pub fn reset(&self) {
        *self.stats.lock() = RetryStats::default();
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the stats aggregator.
    use std::sync::Arc;
    use std::thread;

    use super::*;

    /// Validates counters for a retry-then-success sequence.
    ///
    /// Assertions:
    /// - Confirms retries and consecutive failures grow per scheduled retry
    /// - Confirms success resets consecutive failures and sets the rate
    #[test]
    fn test_retry_then_success() {
        let agg = StatsAggregator::new();
        agg.record_retry(SystemTime::now());
        agg.record_retry(SystemTime::now());
        assert_eq!(agg.snapshot().consecutive_failures, 2);

        agg.record_success(Duration::from_millis(30));
        let stats = agg.snapshot();
        assert_eq!(stats.retry_attempts, 2);
        assert_eq!(stats.retry_successes, 1);
        assert_eq!(stats.consecutive_failures, 0);
        assert!(stats.last_retry_time.is_some());
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
    }

    /// Validates rolling average and maximum latency.
    #[test]
    fn test_latency_average_and_max() {
        let agg = StatsAggregator::new();
        agg.record_success(Duration::from_millis(10));
        agg.record_success(Duration::from_millis(30));
        agg.record_success(Duration::from_millis(20));

        let stats = agg.snapshot();
        assert_eq!(stats.avg_retry_latency, Duration::from_millis(20));
        assert_eq!(stats.max_retry_latency, Duration::from_millis(30));
    }

    /// Validates success rate with mixed outcomes.
    #[test]
    fn test_success_rate_mixed() {
        let agg = StatsAggregator::new();
        assert!(agg.snapshot().success_rate.abs() < f64::EPSILON);

        agg.record_success(Duration::from_millis(1));
        agg.record_failure();
        agg.record_abandoned();
        agg.record_success(Duration::from_millis(1));

        let stats = agg.snapshot();
        assert_eq!(stats.total_operations(), 4);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert!(stats.to_string().contains("successes: 2"));
    }

    #[test]
    fn test_reset() {
        let agg = StatsAggregator::new();
        agg.record_failure();
        agg.reset();
        assert_eq!(agg.snapshot(), RetryStats::default());
    }

    /// Validates concurrent updates are not lost.
    #[test]
    fn test_concurrent_updates() {
        let agg = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    for _ in 0..250 {
                        agg.record_retry(SystemTime::now());
                        agg.record_success(Duration::from_millis(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread finished");
        }

        let stats = agg.snapshot();
        assert_eq!(stats.retry_attempts, 1_000);
        assert_eq!(stats.retry_successes, 1_000);
    }
}
