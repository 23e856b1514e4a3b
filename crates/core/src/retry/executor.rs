//! Retry executor
//!
//! Runs one operation under the executor's [`RetryPolicy`]:
//!
//! 1. Before every attempt, cancellation and the overall deadline are
//!    checked. No attempt starts after either has tripped.
//! 2. The operation is invoked with a child of the caller's cancellation
//!    token.
//! 3. A failure is classified. Permanent or rejected errors end the
//!    execution, the final allowed attempt ends it as exhausted, otherwise a
//!    backoff wait is raced against cancellation.
//!
//! `N` attempts therefore incur exactly `N - 1` waits. The per-key
//! [`RetryState`] entry lives for the duration of one execution and is
//! removed on every exit path, including the execution future being dropped.

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::constants::{metric, DEFAULT_SCOPE};
use super::policy::RetryPolicy;
use super::state::{RetryState, RetryStateStore};
use super::stats::{RetryStats, StatsAggregator};
use super::tracing::RetrySpan;
use crate::error::{RetryError, StateResult};
use crate::observability::{MetricsCollector, NoOpMetricsCollector};
use crate::resilience::RetryGroup;
use crate::time::{Clock, SystemClock};

/// Result of one execution together with its bookkeeping
#[derive(Debug)]
pub struct RetryOutcome<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    /// Value of the succeeding attempt or the terminal error
    pub result: Result<T, RetryError<E>>,
    /// Operation invocations made
    pub attempts: u32,
    /// Sum of completed backoff waits
    pub total_delay: Duration,
    /// Time from the start of the execution to its terminal outcome
    pub elapsed: Duration,
    /// The key's state entry as it was just before removal
    pub final_state: Option<RetryState>,
}

impl<T, E> RetryOutcome<T, E>
where
    E: StdError + Send + Sync + 'static,
{
    /// Drop the bookkeeping and keep the result
    pub fn into_result(self) -> Result<T, RetryError<E>> {
        self.result
    }

    /// Whether the execution produced a value
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Mean backoff wait between attempts
    pub fn average_delay(&self) -> Option<Duration> {
        if self.attempts <= 1 {
            None
        } else {
            Some(self.total_delay / (self.attempts - 1))
        }
    }
}

struct Inner {
    name: String,
    policy: RetryPolicy,
    store: RetryStateStore,
    stats: StatsAggregator,
    metrics: Arc<dyn MetricsCollector>,
    clock: Arc<dyn Clock>,
}

impl Inner {
    fn scope_labels(&self) -> [(&str, &str); 1] {
        [(metric::SCOPE_LABEL, self.name.as_str())]
    }

    fn report_active(&self) {
        #[allow(clippy::cast_precision_loss)]
        let active = self.store.active_count() as f64;
        self.metrics.record_gauge(metric::ACTIVE_RETRIES, active, &self.scope_labels());
    }

    fn record_attempt(&self, key: &str, error: Option<String>, backoff: Duration) {
        if let Err(e) = self.store.record(key, error, backoff) {
            // Another execution with the same key already cleared the entry
            warn!(scope = %self.name, key, error = %e, "failed to record retry attempt");
        }
    }

    fn release(&self, key: &str) -> Option<RetryState> {
        let state = self.store.clear(key);
        self.report_active();
        state
    }

    fn report_outcome<T, E>(&self, result: &Result<T, RetryError<E>>, elapsed: Duration)
    where
        E: StdError + Send + Sync + 'static,
    {
        let scope = self.scope_labels();
        match result {
            Ok(_) => {
                self.metrics.increment_counter(metric::RETRY_SUCCESS, &scope);
                self.metrics.record_histogram(metric::RETRY_LATENCY, millis_f64(elapsed), &scope);
            }
            Err(err) => {
                let labels = [
                    (metric::SCOPE_LABEL, self.name.as_str()),
                    (metric::REASON_LABEL, err.kind().as_str()),
                ];
                self.metrics.increment_counter(metric::RETRY_FAILURE, &labels);
            }
        }
        let rate = self.stats.snapshot().success_rate;
        self.metrics.record_gauge(metric::SUCCESS_RATE, rate, &scope);
    }
}

#[allow(clippy::cast_precision_loss)]
fn millis_f64(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1_000.0
}

/// Removes the key's state entry when the execution ends or is dropped
struct StateGuard<'a> {
    inner: &'a Inner,
    key: &'a str,
    armed: bool,
}

impl StateGuard<'_> {
    fn finish(mut self) -> Option<RetryState> {
        self.armed = false;
        self.inner.release(self.key)
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!(scope = %self.inner.name, key = self.key, "execution dropped before completion");
            self.inner.release(self.key);
        }
    }
}

/// Runs operations under a retry policy while tracking per-key state,
/// aggregate statistics and metrics
///
/// Cheap to clone; clones share the same store, stats and collaborators.
#[derive(Clone)]
pub struct RetryExecutor {
    inner: Arc<Inner>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("name", &self.inner.name)
            .field("policy", &self.inner.policy)
            .field("store", &self.inner.store)
            .field("metrics", &self.inner.metrics)
            .finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl RetryExecutor {
    /// Executor with the system clock and no metrics
    pub fn new(policy: RetryPolicy) -> Self {
        Self::builder().policy(policy).build()
    }

    /// Builder for a named executor with custom collaborators
    pub fn builder() -> RetryExecutorBuilder {
        RetryExecutorBuilder::new()
    }

    /// Scope label attached to logs and metrics
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Policy applied to every execution
    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    /// Clock used for deadlines and state timestamps
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// Metrics collaborator receiving every sample
    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.inner.metrics
    }

    /// Snapshot of the aggregate statistics
    pub fn stats(&self) -> RetryStats {
        self.inner.stats.snapshot()
    }

    /// Zero the aggregate statistics
    pub fn reset_stats(&self) {
        self.inner.stats.reset();
    }

    /// Snapshot of an in-flight execution's state
    pub fn state(&self, key: &str) -> StateResult<RetryState> {
        self.inner.store.get(key)
    }

    /// Number of executions currently in flight
    pub fn active_retries(&self) -> usize {
        self.inner.store.active_count()
    }

    /// Start a retry group whose scope is a child of `cancel`
    pub fn group<E>(&self, cancel: &CancellationToken) -> RetryGroup<E>
    where
        E: StdError + Send + Sync + 'static,
    {
        RetryGroup::new(self.clone(), cancel)
    }

    /// Run `operation` until it succeeds or the policy gives up
    ///
    /// The operation receives a fresh child of `cancel` on every attempt.
    /// Cancelling `cancel` never interrupts a running attempt; it stops the
    /// next attempt from starting and wakes a pending backoff wait.
    pub async fn execute_with_retry<T, E, F, Fut>(
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
        self.execute_with_outcome(cancel, key, operation).await.into_result()
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), also
    /// returning attempt counts, timings and the final state snapshot
    #[instrument(skip_all, fields(scope = %self.inner.name, key = %key))]
    pub async fn execute_with_outcome<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        mut operation: F,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StdError + Send + Sync + 'static,
    {
        let inner = &*self.inner;
        let policy = &inner.policy;
        let backoff = policy.backoff();
        let max_attempts = policy.max_attempts();
        let start = inner.clock.now();
        let mut span = RetrySpan::new(&inner.name, key, max_attempts);

        if !inner.store.init(key, max_attempts) {
            warn!(
                scope = %inner.name,
                key,
                "retry state already exists; the same key is executing concurrently"
            );
        }
        let guard = StateGuard { inner, key, armed: true };
        inner.report_active();

        let mut attempts = 0u32;
        let mut total_delay = Duration::ZERO;
        let mut last_error: Option<E> = None;

        let result = loop {
            if cancel.is_cancelled() {
                span.cancelled(attempts);
                inner.stats.record_abandoned();
                break Err(RetryError::Cancelled { attempts, last_error: last_error.take() });
            }

            if let Some(max_duration) = policy.max_duration() {
                let elapsed = inner.clock.now().saturating_duration_since(start);
                if elapsed > max_duration {
                    span.timed_out(elapsed, max_duration);
                    inner.stats.record_abandoned();
                    break Err(RetryError::Timeout {
                        elapsed,
                        max_duration,
                        last_error: last_error.take(),
                    });
                }
            }

            attempts += 1;
            span.attempt(attempts);

            let attempt_start = inner.clock.now();
            let err = match operation(cancel.child_token()).await {
                Ok(value) => {
                    inner.record_attempt(key, None, Duration::ZERO);
                    let elapsed = inner.clock.now().saturating_duration_since(start);
                    inner.stats.record_success(elapsed);
                    policy.hooks().fire_success(attempts);
                    span.succeeded(attempts, elapsed);
                    break Ok(value);
                }
                Err(err) => err,
            };

            if !policy.should_retry(&err) {
                inner.record_attempt(key, Some(err.to_string()), Duration::ZERO);
                inner.stats.record_failure();
                span.non_retryable(attempts, &err);
                break Err(RetryError::NonRetryable { attempts, source: err });
            }

            if attempts >= max_attempts {
                inner.record_attempt(key, Some(err.to_string()), Duration::ZERO);
                inner.stats.record_failure();
                policy.hooks().fire_max_attempts_reached(&err);
                inner.metrics.increment_counter(metric::RETRY_MAX_ATTEMPTS, &inner.scope_labels());
                span.exhausted(attempts, &err);
                break Err(RetryError::Exhausted { attempts, source: err });
            }

            let attempt_latency = inner.clock.now().saturating_duration_since(attempt_start);
            let delay = backoff.delay(attempts);
            inner.record_attempt(key, Some(err.to_string()), delay);
            policy.hooks().fire_retry(attempts, &err);
            inner.stats.record_retry(inner.clock.system_time());
            let scope = inner.scope_labels();
            inner.metrics.increment_counter(metric::RETRY_ATTEMPTS, &scope);
            inner.metrics.record_histogram(
                metric::RETRY_LATENCY,
                millis_f64(attempt_latency),
                &scope,
            );
            inner.metrics.record_gauge(metric::RETRY_BACKOFF, millis_f64(delay), &scope);
            span.retry_scheduled(attempts, delay, &err);
            last_error = Some(err);

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    span.cancelled(attempts);
                    inner.stats.record_abandoned();
                    break Err(RetryError::Cancelled { attempts, last_error: last_error.take() });
                }
                () = tokio::time::sleep(delay) => {
                    total_delay += delay;
                }
            }
        };

        let elapsed = inner.clock.now().saturating_duration_since(start);
        inner.report_outcome(&result, elapsed);
        let final_state = guard.finish();

        RetryOutcome { result, attempts, total_delay, elapsed, final_state }
    }

    /// Run `operation` with retries, handing any terminal error except
    /// cancellation to `fallback`
    pub async fn execute_with_fallback<T, E, F, Fut, FB, FbFut>(
        &self,
        cancel: &CancellationToken,
        key: &str,
        operation: F,
        fallback: FB,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(RetryError<E>) -> FbFut,
        FbFut: Future<Output = Result<T, RetryError<E>>>,
        E: StdError + Send + Sync + 'static,
    {
        match self.execute_with_retry(cancel, key, operation).await {
            Ok(value) => Ok(value),
            Err(err) if err.is_cancelled() => Err(err),
            Err(err) => {
                debug!(scope = %self.inner.name, key, reason = %err.kind(), "running fallback");
                fallback(err).await
            }
        }
    }
}

/// Builder for [`RetryExecutor`]
pub struct RetryExecutorBuilder {
    name: String,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsCollector>,
    clock: Arc<dyn Clock>,
}

impl Default for RetryExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RetryExecutorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutorBuilder")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutorBuilder {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_SCOPE.to_string(),
            policy: RetryPolicy::default(),
            metrics: Arc::new(NoOpMetricsCollector),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Clock used for deadlines, state timestamps and latency
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> RetryExecutor {
        let store = RetryStateStore::new(Arc::clone(&self.clock));
        RetryExecutor {
            inner: Arc::new(Inner {
                name: self.name,
                policy: self.policy,
                store,
                stats: StatsAggregator::new(),
                metrics: self.metrics,
                clock: self.clock,
            }),
        }
    }
}
