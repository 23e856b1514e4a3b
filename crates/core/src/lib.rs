//! Retry and resilience execution engine.
//!
//! `steadfast-core` runs caller-supplied async operations under a retry
//! policy (bounded attempts, exponential backoff with jitter, an optional
//! overall deadline), tracks per-operation retry state concurrently, guards
//! dependencies with a circuit breaker, and fans out many independently
//! retried operations under one cancellation scope.
//!
//! # Module Map
//!
//! - [`retry`]: backoff calculator, policy, state store, stats aggregator and
//!   the [`RetryExecutor`] itself
//! - [`resilience`]: [`CircuitBreaker`] and [`RetryGroup`], both composed on
//!   top of an executor
//! - [`observability`]: the pluggable [`MetricsCollector`] collaborator and
//!   its sinks
//! - [`config`]: declarative engine configuration (TOML, JSON, environment)
//! - [`error`]: the retry error taxonomy and classification helpers
//! - [`time`]: clock abstraction used for deadlines and breaker timeouts
//! - [`testing`]: helpers for exercising retry behaviour in tests
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use steadfast_core::{RetryExecutor, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_interval(Duration::from_millis(10))
//!     .max_interval(Duration::from_millis(100))
//!     .multiplier(2.0)
//!     .jitter(false)
//!     .build()?;
//!
//! let executor = RetryExecutor::new(policy);
//! let cancel = CancellationToken::new();
//!
//! let body = executor
//!     .execute_with_retry(&cancel, "fetch-profile", |_attempt_token| async {
//!         Ok::<_, std::io::Error>("profile")
//!     })
//!     .await?;
//! assert_eq!(body, "profile");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod config;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod retry;
pub mod testing;
pub mod time;
pub mod utils;

// Re-export commonly used types for convenience
// ------------------------
pub use config::EngineConfig;
pub use error::{
    is_permanent, permanent, BoxedError, ConfigError, ConfigResult, ErrorClassification,
    ErrorSeverity, Permanent, RetryError, RetryErrorKind, RetryResult, StateError, StateResult,
};
pub use observability::{InMemoryMetricsCollector, MetricsCollector, NoOpMetricsCollector};
#[cfg(feature = "prometheus")]
pub use observability::PrometheusMetricsCollector;
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, MemberError, RetryGroup,
};
pub use retry::{
    Backoff, RetryCondition, RetryExecutor, RetryExecutorBuilder, RetryHooks, RetryOutcome,
    RetryPhase, RetryPolicy, RetryPolicyBuilder, RetrySettings, RetryState, RetryStateStore,
    RetryStats, StatsAggregator,
};
pub use time::{Clock, MockClock, SystemClock};
pub use utils::serde::{duration_millis, option_duration_millis};
