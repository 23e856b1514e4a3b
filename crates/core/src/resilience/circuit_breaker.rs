//! Circuit breaker composed over a [`RetryExecutor`]
//!
//! The breaker counts terminal failures of whole retried executions. Once
//! `max_failures` is reached, calls fail fast with
//! [`RetryError::CircuitOpen`] without invoking the operation. After
//! `reset_timeout` has passed since the last failure, exactly one call is
//! admitted as a trial. Admission clears the failure count, so a failed
//! trial counts as the first failure of a new run and only reopens the
//! circuit when `max_failures` is 1.
//!
//! The reset check is lazy. An open breaker with no traffic stays open until
//! the next call arrives.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{ConfigError, ConfigResult, RetryError};
use crate::retry::constants::{metric, DEFAULT_MAX_FAILURES, DEFAULT_RESET_TIMEOUT};
use crate::retry::RetryExecutor;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected without running
    Open,
    /// The reset timeout elapsed; the next call (or the one in flight) is a trial
    HalfOpen,
}

impl CircuitState {
    /// Gauge encoding (0=closed, 1=open, 2=half-open)
    pub fn as_gauge(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures that open the circuit
    pub max_failures: u32,
    /// Time an open circuit waits after the last failure before a trial call
    #[serde(rename = "reset_timeout_ms", with = "crate::utils::serde::duration_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { max_failures: DEFAULT_MAX_FAILURES, reset_timeout: DEFAULT_RESET_TIMEOUT }
    }
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_failures == 0 {
            return Err(ConfigError::invalid("max_failures", "must be greater than 0"));
        }
        if self.reset_timeout.is_zero() {
            return Err(ConfigError::invalid("reset_timeout", "must be greater than zero"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_failures(mut self, max_failures: u32) -> Self {
        self.config.max_failures = max_failures;
        self
    }

    #[must_use]
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Circuit breaker metrics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub failure_count: u32,
    /// Calls that arrived at the breaker, rejected ones included
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    last_failure_time: Option<Instant>,
    trial_in_flight: bool,
    total_calls: u64,
    rejected_calls: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Trial,
}

/// Releases the trial slot if a trial call's future is dropped mid-flight
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.state.lock().trial_in_flight = false;
        }
    }
}

/// Circuit breaker wrapping every call in the executor's retry loop
pub struct CircuitBreaker {
    scope: String,
    executor: RetryExecutor,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("scope", &self.scope)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a breaker named `scope` over `executor`
    ///
    /// The breaker measures its reset timeout with the executor's clock and
    /// reports through the executor's metrics collector.
    pub fn new(
        scope: impl Into<String>,
        executor: RetryExecutor,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let state = Mutex::new(BreakerState::default());
        Ok(Self { scope: scope.into(), executor, config, state })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Current state, derived from the failure count, last failure time and
    /// trial flag
    pub fn state(&self) -> CircuitState {
        let now = self.executor.clock().now();
        self.derive_state(&self.state.lock(), now)
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.executor.clock().now();
        let state = self.state.lock();
        CircuitBreakerMetrics {
            state: self.derive_state(&state, now),
            failure_count: state.failure_count,
            total_calls: state.total_calls,
            rejected_calls: state.rejected_calls,
            last_failure_time: state.last_failure_time,
        }
    }

    /// Force the breaker closed, keeping call totals
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.failure_count = 0;
            state.last_failure_time = None;
            state.trial_in_flight = false;
        }
        info!(scope = %self.scope, "circuit breaker manually reset");
        self.report_state();
    }

    /// Run `operation` through the executor unless the circuit is open
    #[instrument(skip_all, fields(scope = %self.scope, key = %key))]
    pub async fn execute<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(retry_after) => {
                self.executor.metrics().increment_counter(
                    metric::CIRCUIT_REJECTED,
                    &[(metric::SCOPE_LABEL, self.scope.as_str())],
                );
                return Err(RetryError::CircuitOpen { scope: self.scope.clone(), retry_after });
            }
        };

        let is_trial = admission == Admission::Trial;
        let mut guard = TrialGuard { breaker: self, armed: is_trial };
        if is_trial {
            info!(scope = %self.scope, key, "circuit half-open, admitting trial call");
            self.report_state();
        }

        let result = self.executor.execute_with_retry(cancel, key, operation).await;
        self.complete(&result, is_trial);
        guard.armed = false;
        result
    }

    fn derive_state(&self, state: &BreakerState, now: Instant) -> CircuitState {
        if state.trial_in_flight {
            return CircuitState::HalfOpen;
        }
        if state.failure_count < self.config.max_failures {
            return CircuitState::Closed;
        }
        match state.last_failure_time {
            Some(at) if now.saturating_duration_since(at) < self.config.reset_timeout => {
                CircuitState::Open
            }
            _ => CircuitState::HalfOpen,
        }
    }

    /// Admit a call, or return how long until the circuit may admit one
    fn admit(&self) -> Result<Admission, Duration> {
        let now = self.executor.clock().now();
        let mut state = self.state.lock();
        state.total_calls += 1;

        // The trial runs with a cleared count, so the flag is checked first
        if state.trial_in_flight {
            state.rejected_calls += 1;
            return Err(Duration::ZERO);
        }

        if state.failure_count < self.config.max_failures {
            return Ok(Admission::Normal);
        }

        let since_failure = state
            .last_failure_time
            .map_or(self.config.reset_timeout, |at| now.saturating_duration_since(at));
        if since_failure < self.config.reset_timeout {
            state.rejected_calls += 1;
            return Err(self.config.reset_timeout - since_failure);
        }

        state.failure_count = 0;
        state.trial_in_flight = true;
        Ok(Admission::Trial)
    }

    fn complete<T, E>(&self, result: &Result<T, RetryError<E>>, was_trial: bool)
    where
        E: StdError + Send + Sync + 'static,
    {
        let now = self.executor.clock().now();
        {
            let mut state = self.state.lock();
            if was_trial {
                state.trial_in_flight = false;
            }
            match result {
                Ok(_) => {
                    state.failure_count = 0;
                    if was_trial {
                        info!(scope = %self.scope, "circuit closed after successful trial");
                    }
                }
                // Cancellation says nothing about the dependency's health
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    state.failure_count = state.failure_count.saturating_add(1);
                    state.last_failure_time = Some(now);
                    if state.failure_count == self.config.max_failures {
                        warn!(
                            scope = %self.scope,
                            failures = state.failure_count,
                            error = %err,
                            "circuit opened"
                        );
                    } else if was_trial {
                        warn!(
                            scope = %self.scope,
                            failures = state.failure_count,
                            error = %err,
                            "trial call failed"
                        );
                    }
                }
            }
        }
        self.report_state();
    }

    fn report_state(&self) {
        self.executor.metrics().record_gauge(
            metric::CIRCUIT_STATE,
            self.state().as_gauge(),
            &[(metric::SCOPE_LABEL, self.scope.as_str())],
        );
    }
}
