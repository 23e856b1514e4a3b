//! Retry engine
//!
//! Leaves first: [`backoff`] computes delays, [`policy`] holds the immutable
//! retry rules, [`state`] and [`stats`] track per-key and aggregate progress,
//! and [`executor`] ties them together into the retry loop.

pub mod backoff;
pub mod constants;
pub mod executor;
pub mod policy;
pub mod state;
pub mod stats;
pub mod tracing;

pub use backoff::Backoff;
pub use executor::{RetryExecutor, RetryExecutorBuilder, RetryOutcome};
pub use policy::{
    ErrorPredicate, RetryCondition, RetryHooks, RetryPolicy, RetryPolicyBuilder, RetrySettings,
};
pub use state::{RetryState, RetryStateStore};
pub use stats::{RetryStats, StatsAggregator};
pub use self::tracing::RetryPhase;
