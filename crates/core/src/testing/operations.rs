//! Scripted operations for exercising retry behaviour

use std::future::{ready, Future};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Error returned by [`ScriptedOperation`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TestError {
    pub message: String,
    pub retryable: bool,
}

impl TestError {
    /// An error [`RetryCondition::classified`](crate::retry::RetryCondition::classified)
    /// retries
    pub fn transient(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: true }
    }

    /// An error `classified` gives up on immediately
    pub fn fatal(message: impl Into<String>) -> Self {
        Self { message: message.into(), retryable: false }
    }
}

impl ErrorClassification for TestError {
    fn is_retryable(&self) -> bool {
        self.retryable
    }

    fn severity(&self) -> ErrorSeverity {
        if self.retryable {
            ErrorSeverity::Warning
        } else {
            ErrorSeverity::Error
        }
    }
}

/// Operation that fails a fixed number of times, then succeeds
///
/// Clones share the invocation counter, so a clone can be moved into a
/// spawned task while the test keeps one to inspect `calls()`. On success the
/// operation yields the 1-based number of the succeeding call.
#[derive(Debug, Clone)]
pub struct ScriptedOperation {
    failures: u32,
    retryable: bool,
    calls: Arc<AtomicU32>,
}

impl ScriptedOperation {
    /// Fail the first `failures` calls with a transient error
    pub fn failing_times(failures: u32) -> Self {
        Self { failures, retryable: true, calls: Arc::new(AtomicU32::new(0)) }
    }

    /// Succeed on the first call
    pub fn succeeding() -> Self {
        Self::failing_times(0)
    }

    /// Fail every call with a transient error
    pub fn always_failing() -> Self {
        Self::failing_times(u32::MAX)
    }

    /// Fail every call with a non-retryable [`TestError`]
    pub fn always_fatal() -> Self {
        Self { failures: u32::MAX, retryable: false, calls: Arc::new(AtomicU32::new(0)) }
    }

    /// Invoke the operation once
    pub fn call(&self) -> impl Future<Output = Result<u32, TestError>> + Send + 'static {
        let call = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let outcome = if call <= self.failures {
            let message = format!("scripted failure #{call}");
            Err(TestError { message, retryable: self.retryable })
        } else {
            Ok(call)
        };
        ready(outcome)
    }

    /// Number of invocations so far
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates the scripted failure sequence.
    ///
    /// Assertions:
    /// - Confirms the first `n` calls fail and the next one succeeds
    /// - Confirms clones share the call counter
    #[tokio::test]
    async fn test_failing_times_then_success() {
        let op = ScriptedOperation::failing_times(2);
        let clone = op.clone();

        assert_eq!(op.call().await, Err(TestError::transient("scripted failure #1")));
        assert!(clone.call().await.is_err());
        assert_eq!(op.call().await, Ok(3));
        assert_eq!(clone.calls(), 3);
    }

    #[tokio::test]
    async fn test_always_fatal_is_not_retryable() {
        let op = ScriptedOperation::always_fatal();
        let err = op.call().await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.severity(), ErrorSeverity::Error);
    }
}
