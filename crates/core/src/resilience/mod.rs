//! Resilience primitives layered on top of the retry executor

pub mod circuit_breaker;
pub mod group;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use group::{MemberError, RetryGroup};
