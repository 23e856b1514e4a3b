// Constants for the retry module
use std::time::Duration;

/// Default maximum number of attempts (initial call included)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(100);

/// Default cap on the un-jittered backoff
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);

/// Default exponential growth factor
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Jitter is enabled unless explicitly turned off
pub const DEFAULT_JITTER: bool = true;

/// Lower bound of the jitter factor applied to the capped delay
pub const JITTER_MIN_FACTOR: f64 = 0.5;

/// Width of the jitter factor range (`[0.5, 1.5)`)
pub const JITTER_SPAN: f64 = 1.0;

/// Minimum allowed max_attempts value
pub const MIN_MAX_ATTEMPTS: u32 = 1;

/// Maximum allowed max_attempts value
pub const MAX_MAX_ATTEMPTS: u32 = 1_000;

/// Executor name used when none is configured
pub const DEFAULT_SCOPE: &str = "default";

/// Circuit breaker: default failure threshold
pub const DEFAULT_MAX_FAILURES: u32 = 5;

/// Circuit breaker: default time an open circuit waits before a trial call
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

/// Metric names reported through the metrics collaborator
pub mod metric {
    pub const RETRY_ATTEMPTS: &str = "retry_attempts";
    pub const RETRY_SUCCESS: &str = "retry_success";
    pub const RETRY_FAILURE: &str = "retry_failure";
    pub const RETRY_MAX_ATTEMPTS: &str = "retry_max_attempts";
    pub const RETRY_LATENCY: &str = "retry_latency";
    pub const ACTIVE_RETRIES: &str = "active_retries";
    pub const RETRY_BACKOFF: &str = "retry_backoff";
    pub const SUCCESS_RATE: &str = "success_rate";
    pub const CIRCUIT_STATE: &str = "circuit_state";
    pub const CIRCUIT_REJECTED: &str = "circuit_rejected";

    /// Label carrying the executor or breaker name
    pub const SCOPE_LABEL: &str = "scope";
    /// Label carrying the terminal error kind on `retry_failure`
    pub const REASON_LABEL: &str = "reason";
}
