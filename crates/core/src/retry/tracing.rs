//! Structured logging of per-key retry state transitions
//!
//! Every execution walks the state machine
//! `Idle -> Attempting -> {Succeeded | RetryWait -> Attempting | Exhausted |
//! NonRetryable | TimedOut | Cancelled}`. [`RetrySpan`] tracks the current
//! phase and emits one `tracing` event per transition.

use std::fmt;
use std::time::Duration;

use tracing::{debug, error, warn};

/// Phase of a single retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryPhase {
    Idle,
    Attempting,
    RetryWait,
    Succeeded,
    Exhausted,
    NonRetryable,
    TimedOut,
    Cancelled,
}

impl RetryPhase {
    /// Whether the phase ends the execution
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Idle | Self::Attempting | Self::RetryWait)
    }
}

impl fmt::Display for RetryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Attempting => "ATTEMPTING",
            Self::RetryWait => "RETRY_WAIT",
            Self::Succeeded => "SUCCEEDED",
            Self::Exhausted => "EXHAUSTED",
            Self::NonRetryable => "NON_RETRYABLE",
            Self::TimedOut => "TIMED_OUT",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Logging companion of one execution
#[derive(Debug)]
pub(crate) struct RetrySpan<'a> {
    scope: &'a str,
    key: &'a str,
    max_attempts: u32,
    phase: RetryPhase,
}

impl<'a> RetrySpan<'a> {
    pub(crate) fn new(scope: &'a str, key: &'a str, max_attempts: u32) -> Self {
        Self { scope, key, max_attempts, phase: RetryPhase::Idle }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> RetryPhase {
        self.phase
    }

    fn transition(&mut self, to: RetryPhase) -> RetryPhase {
        let from = self.phase;
        self.phase = to;
        debug!(scope = self.scope, key = self.key, %from, %to, "retry state transition");
        from
    }

    pub(crate) fn attempt(&mut self, attempt: u32) {
        self.transition(RetryPhase::Attempting);
        debug!(
            scope = self.scope,
            key = self.key,
            attempt,
            max_attempts = self.max_attempts,
            "starting attempt"
        );
    }

    pub(crate) fn retry_scheduled(
        &mut self,
        attempt: u32,
        delay: Duration,
        error: &dyn fmt::Display,
    ) {
        self.transition(RetryPhase::RetryWait);
        warn!(
            scope = self.scope,
            key = self.key,
            attempt,
            max_attempts = self.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "attempt failed, retrying after backoff"
        );
    }

    pub(crate) fn succeeded(&mut self, attempt: u32, elapsed: Duration) {
        self.transition(RetryPhase::Succeeded);
        debug!(
            scope = self.scope,
            key = self.key,
            attempt,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "operation succeeded"
        );
    }

    pub(crate) fn exhausted(&mut self, attempts: u32, error: &dyn fmt::Display) {
        self.transition(RetryPhase::Exhausted);
        error!(
            scope = self.scope,
            key = self.key,
            attempts,
            error = %error,
            "all retry attempts exhausted"
        );
    }

    pub(crate) fn non_retryable(&mut self, attempt: u32, error: &dyn fmt::Display) {
        self.transition(RetryPhase::NonRetryable);
        warn!(
            scope = self.scope,
            key = self.key,
            attempt,
            error = %error,
            "non-retryable error, giving up"
        );
    }

    pub(crate) fn timed_out(&mut self, elapsed: Duration, max_duration: Duration) {
        self.transition(RetryPhase::TimedOut);
        warn!(
            scope = self.scope,
            key = self.key,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            max_duration_ms = u64::try_from(max_duration.as_millis()).unwrap_or(u64::MAX),
            "retry deadline exceeded"
        );
    }

    pub(crate) fn cancelled(&mut self, attempts: u32) {
        let from = self.transition(RetryPhase::Cancelled);
        warn!(scope = self.scope, key = self.key, attempts, %from, "retry cancelled");
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for retry phase tracking.
    use super::*;

    /// Validates a retry-then-success walk through the state machine.
    ///
    /// Assertions:
    /// - Confirms each call moves to the documented phase
    /// - Confirms only the final phase is terminal
    #[test]
    fn test_phase_transitions() {
        let mut span = RetrySpan::new("scope", "key", 3);
        assert_eq!(span.phase(), RetryPhase::Idle);

        span.attempt(1);
        assert_eq!(span.phase(), RetryPhase::Attempting);
        assert!(!span.phase().is_terminal());

        span.retry_scheduled(1, Duration::from_millis(10), &"boom");
        assert_eq!(span.phase(), RetryPhase::RetryWait);

        span.attempt(2);
        span.succeeded(2, Duration::from_millis(15));
        assert_eq!(span.phase(), RetryPhase::Succeeded);
        assert!(span.phase().is_terminal());
    }

    /// Validates terminal failure phases.
    #[test]
    fn test_terminal_failure_phases() {
        let mut span = RetrySpan::new("scope", "key", 1);
        span.attempt(1);
        span.exhausted(1, &"boom");
        assert_eq!(span.phase(), RetryPhase::Exhausted);

        let mut span = RetrySpan::new("scope", "key", 3);
        span.timed_out(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(span.phase(), RetryPhase::TimedOut);

        let mut span = RetrySpan::new("scope", "key", 3);
        span.cancelled(0);
        assert_eq!(span.phase(), RetryPhase::Cancelled);

        let mut span = RetrySpan::new("scope", "key", 3);
        span.non_retryable(1, &"denied");
        assert_eq!(span.phase(), RetryPhase::NonRetryable);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(RetryPhase::RetryWait.to_string(), "RETRY_WAIT");
        assert_eq!(RetryPhase::TimedOut.to_string(), "TIMED_OUT");
    }
}
