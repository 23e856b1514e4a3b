//! Error taxonomy and classification for the retry engine
//!
//! Every terminal path of the engine returns one of the [`RetryError`]
//! variants, wrapping the last underlying cause where one exists:
//!
//! | Variant | Produced by | Wraps last cause |
//! |---------|-------------|------------------|
//! | `NonRetryable` | policy classified the error as permanent | yes |
//! | `Exhausted` | every attempt was consumed | yes |
//! | `Timeout` | the overall `max_duration` deadline passed | when an attempt failed first |
//! | `Cancelled` | cancellation observed before/between attempts | when an attempt failed first |
//! | `CircuitOpen` | breaker rejected the call without running it | no |
//! | `TaskAborted` | a retry group member task panicked | no |
//!
//! ## ErrorClassification
//!
//! Operation error types can implement [`ErrorClassification`] so a policy
//! built with [`RetryCondition::classified`](crate::retry::RetryCondition::classified)
//! asks the error itself whether it is worth retrying.
//!
//! ## Permanent errors
//!
//! Wrapping a cause in [`Permanent`] (see [`permanent`]) marks it as never
//! retryable regardless of the policy's condition. The marker is found
//! anywhere in the error's `source()` chain.

use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Boxed error type for type-erased causes
pub type BoxedError = Box<dyn StdError + Send + Sync + 'static>;

/// Result type for retried operations
pub type RetryResult<T, E> = Result<T, RetryError<E>>;

/// Result type for configuration and validation
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for state store lookups
pub type StateResult<T> = Result<T, StateError>;

// ============================================================================
// Classification
// ============================================================================

/// Unified severity level used for logging and alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ErrorSeverity {
    /// Expected condition, informational only
    Info,
    /// Degraded but operational
    #[default]
    Warning,
    /// Failure requiring attention
    Error,
    /// System integrity at risk
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Standard interface for classifying errors by their characteristics
pub trait ErrorClassification {
    /// Whether retrying the failed operation may succeed
    fn is_retryable(&self) -> bool;

    /// Severity of the error
    fn severity(&self) -> ErrorSeverity;

    /// Whether the error requires immediate attention
    fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Critical
    }

    /// Suggested delay before retrying, if the error carries one
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

// ============================================================================
// Permanent marker
// ============================================================================

/// Marks a cause as permanently failed; the executor never retries it
#[derive(Debug, Error)]
#[error("permanent failure: {source}")]
pub struct Permanent {
    #[source]
    source: BoxedError,
}

impl Permanent {
    /// Wrap an error as permanent
    pub fn new(error: impl Into<BoxedError>) -> Self {
        Self { source: error.into() }
    }

    /// Borrow the wrapped cause
    pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Unwrap the marker and return the original cause
    pub fn into_inner(self) -> BoxedError {
        self.source
    }
}

/// Convenience constructor for [`Permanent`]
pub fn permanent(error: impl Into<BoxedError>) -> Permanent {
    Permanent::new(error)
}

/// Returns `true` when `error` or any error in its `source()` chain is a
/// [`Permanent`] marker
pub fn is_permanent(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if err.is::<Permanent>() {
            return true;
        }
        current = err.source();
    }
    false
}

// ============================================================================
// Retry taxonomy
// ============================================================================

/// Terminal errors returned by the executor, circuit breaker and retry group
///
/// Generic over the operation's own error type `E` so the last cause is
/// preserved without boxing.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: StdError + Send + Sync + 'static,
{
    /// The policy classified the failure as not worth retrying
    #[error("operation failed with a non-retryable error after {attempts} attempt(s)")]
    NonRetryable {
        attempts: u32,
        #[source]
        source: E,
    },

    /// Every configured attempt failed
    #[error("all {attempts} retry attempts exhausted")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// The overall retry deadline passed before the next attempt
    #[error("retry deadline of {max_duration:?} exceeded after {elapsed:?}")]
    Timeout {
        elapsed: Duration,
        max_duration: Duration,
        #[source]
        last_error: Option<E>,
    },

    /// Cancellation was observed before an attempt or during a backoff wait
    #[error("retry cancelled after {attempts} attempt(s)")]
    Cancelled {
        attempts: u32,
        #[source]
        last_error: Option<E>,
    },

    /// The circuit breaker rejected the call without invoking the operation
    #[error("circuit breaker '{scope}' is open (retry in {retry_after:?})")]
    CircuitOpen { scope: String, retry_after: Duration },

    /// A retry group member task panicked before producing a result
    #[error("retry task '{key}' aborted: {reason}")]
    TaskAborted { key: String, reason: String },
}

/// Discriminant of [`RetryError`] used for metric labels and matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryErrorKind {
    NonRetryable,
    Exhausted,
    Timeout,
    Cancelled,
    CircuitOpen,
    TaskAborted,
}

impl RetryErrorKind {
    /// Stable lowercase label for metrics and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonRetryable => "non_retryable",
            Self::Exhausted => "exhausted",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::CircuitOpen => "circuit_open",
            Self::TaskAborted => "task_aborted",
        }
    }
}

impl fmt::Display for RetryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<E> RetryError<E>
where
    E: StdError + Send + Sync + 'static,
{
    /// Variant discriminant
    pub fn kind(&self) -> RetryErrorKind {
        match self {
            Self::NonRetryable { .. } => RetryErrorKind::NonRetryable,
            Self::Exhausted { .. } => RetryErrorKind::Exhausted,
            Self::Timeout { .. } => RetryErrorKind::Timeout,
            Self::Cancelled { .. } => RetryErrorKind::Cancelled,
            Self::CircuitOpen { .. } => RetryErrorKind::CircuitOpen,
            Self::TaskAborted { .. } => RetryErrorKind::TaskAborted,
        }
    }

    /// Number of operation invocations that preceded this error, when known
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::NonRetryable { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Cancelled { attempts, .. } => Some(*attempts),
            Self::CircuitOpen { .. } => Some(0),
            Self::Timeout { .. } | Self::TaskAborted { .. } => None,
        }
    }

    /// The last error returned by the operation, if any attempt ran
    pub fn last_error(&self) -> Option<&E> {
        match self {
            Self::NonRetryable { source, .. } | Self::Exhausted { source, .. } => Some(source),
            Self::Timeout { last_error, .. } | Self::Cancelled { last_error, .. } => {
                last_error.as_ref()
            }
            Self::CircuitOpen { .. } | Self::TaskAborted { .. } => None,
        }
    }

    /// Consume the error and return the last operation error, if any
    pub fn into_last_error(self) -> Option<E> {
        match self {
            Self::NonRetryable { source, .. } | Self::Exhausted { source, .. } => Some(source),
            Self::Timeout { last_error, .. } | Self::Cancelled { last_error, .. } => last_error,
            Self::CircuitOpen { .. } | Self::TaskAborted { .. } => None,
        }
    }

    /// Whether the error was caused by cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether a circuit breaker rejected the call
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

impl<E> ErrorClassification for RetryError<E>
where
    E: StdError + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            // Deadline and open circuit may clear up for a later call
            Self::Timeout { .. } | Self::CircuitOpen { .. } => true,
            Self::NonRetryable { .. }
            | Self::Exhausted { .. }
            | Self::Cancelled { .. }
            | Self::TaskAborted { .. } => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Cancelled { .. } => ErrorSeverity::Info,
            Self::Timeout { .. } | Self::CircuitOpen { .. } => ErrorSeverity::Warning,
            Self::NonRetryable { .. } | Self::Exhausted { .. } => ErrorSeverity::Error,
            Self::TaskAborted { .. } => ErrorSeverity::Critical,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

// ============================================================================
// State store and configuration errors
// ============================================================================

/// Errors returned by the retry state store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// The key has no retry state entry
    #[error("no retry state recorded for key '{key}'")]
    NotFound { key: String },
}

/// Configuration validation and loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },

    /// The configuration text could not be parsed
    #[error("Invalid {format} configuration: {message}")]
    Parse { format: String, message: String },

    /// The configuration file does not exist
    #[error("Config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Reading the configuration file failed
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Shorthand for [`ConfigError::Invalid`]
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }

    /// Shorthand for [`ConfigError::Parse`]
    pub fn parse(format: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse { format: format.into(), message: message.to_string() }
    }
}
