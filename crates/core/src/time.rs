//! Clock abstraction for deadlines and circuit breaker timeouts
//!
//! The executor measures `max_duration` and the breaker measures its reset
//! timeout through a [`Clock`], so tests can drive time with a [`MockClock`]
//! instead of sleeping. Backoff waits still use the tokio timer.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of monotonic and wall-clock time
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis = self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Real time clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Manually advanced clock for deterministic tests
///
/// Clones share the same elapsed counter, so a test can hand one clone to an
/// executor and keep another to advance time.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a mock clock starting at the current instant
    pub fn new() -> Self {
        Self::with_current_time(Instant::now())
    }

    /// Create a mock clock anchored at `start`
    pub fn with_current_time(start: Instant) -> Self {
        Self { start, elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Move time forward by `duration`
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock();
        *elapsed = elapsed.saturating_add(duration);
    }

    /// Set the total elapsed time since the anchor
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Total elapsed time since the anchor
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates that the mock clock only moves when advanced.
    ///
    /// Assertions:
    /// - Confirms `now()` is stable without `advance`
    /// - Confirms `advance` and `set_elapsed` move `now()` by the given amount
    #[test]
    fn test_mock_clock_advance() {
        let clock = MockClock::new();
        let t0 = clock.now();
        assert_eq!(clock.now(), t0);

        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - t0, Duration::from_millis(250));

        clock.set_elapsed(Duration::from_secs(5));
        assert_eq!(clock.now() - t0, Duration::from_secs(5));
        assert_eq!(clock.millis_since_epoch(), 5_000);
    }

    /// Validates that clones share elapsed time.
    #[test]
    fn test_mock_clock_clones_share_time() {
        let clock = MockClock::new();
        let shared = Arc::new(clock.clone());
        let t0 = shared.now();

        clock.advance(Duration::from_secs(1));
        assert_eq!(shared.now() - t0, Duration::from_secs(1));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.millis_since_epoch() > 0);
    }
}
