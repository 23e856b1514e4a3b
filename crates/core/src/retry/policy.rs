//! Retry policy, error conditions and lifecycle hooks
//!
//! A [`RetryPolicy`] is immutable once built. [`RetryPolicyBuilder`]
//! accumulates every option and validates them together in `build()`, so an
//! invalid policy can never reach an executor.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backoff::Backoff;
use super::constants::{
    DEFAULT_INITIAL_INTERVAL, DEFAULT_JITTER, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_INTERVAL,
    DEFAULT_MULTIPLIER, MAX_MAX_ATTEMPTS, MIN_MAX_ATTEMPTS,
};
use crate::error::{is_permanent, ConfigError, ConfigResult, ErrorClassification};

/// Predicate deciding whether an error is worth retrying
pub type ErrorPredicate = Arc<dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync>;

type RetryHook = Arc<dyn Fn(u32, &(dyn StdError + 'static)) + Send + Sync>;
type SuccessHook = Arc<dyn Fn(u32) + Send + Sync>;
type ExhaustedHook = Arc<dyn Fn(&(dyn StdError + 'static)) + Send + Sync>;

// ============================================================================
// Declarative settings
// ============================================================================

/// Serializable part of a retry policy
///
/// Durations are expressed in milliseconds when (de)serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total invocations allowed, initial call included
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(rename = "initial_interval_ms", with = "crate::utils::serde::duration_millis")]
    pub initial_interval: Duration,
    /// Cap on the un-jittered delay
    #[serde(rename = "max_interval_ms", with = "crate::utils::serde::duration_millis")]
    pub max_interval: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.5, 1.5)`
    pub jitter: bool,
    /// Overall deadline measured from the first attempt
    #[serde(
        rename = "max_duration_ms",
        with = "crate::utils::serde::option_duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_duration: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: DEFAULT_JITTER,
            max_duration: None,
        }
    }
}

impl RetrySettings {
    /// Validate ranges and cross-field constraints
    pub fn validate(&self) -> ConfigResult<()> {
        if !(MIN_MAX_ATTEMPTS..=MAX_MAX_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::invalid(
                "max_attempts",
                format!(
                    "must be between {MIN_MAX_ATTEMPTS} and {MAX_MAX_ATTEMPTS}, got {}",
                    self.max_attempts
                ),
            ));
        }

        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid(
                "multiplier",
                format!("must be a finite value >= 1.0, got {}", self.multiplier),
            ));
        }

        if self.initial_interval > self.max_interval {
            return Err(ConfigError::invalid(
                "initial_interval",
                format!(
                    "initial_interval ({:?}) cannot be greater than max_interval ({:?})",
                    self.initial_interval, self.max_interval
                ),
            ));
        }

        if self.max_duration == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("max_duration", "must be greater than zero"));
        }

        Ok(())
    }

    /// Backoff calculator for these settings
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial_interval: self.initial_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

// ============================================================================
// Retry condition
// ============================================================================

/// Condition for determining if an error is retryable
///
/// Errors marked [`Permanent`](crate::error::Permanent) are never retried,
/// whatever the condition says.
#[derive(Default)]
pub enum RetryCondition {
    /// Retry every error
    #[default]
    Always,
    /// Never retry; the first failure is terminal
    Never,
    /// Retry when the predicate returns `true`
    Custom(ErrorPredicate),
}

impl Clone for RetryCondition {
    fn clone(&self) -> Self {
        match self {
            Self::Always => Self::Always,
            Self::Never => Self::Never,
            Self::Custom(f) => Self::Custom(Arc::clone(f)),
        }
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Always => write!(f, "Always"),
            Self::Never => write!(f, "Never"),
            Self::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

impl RetryCondition {
    /// Condition backed by an arbitrary predicate
    pub fn custom<F>(predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(predicate))
    }

    /// Defer to [`ErrorClassification::is_retryable`] on errors of type `E`
    ///
    /// Errors of any other type are treated as retryable.
    pub fn classified<E>() -> Self
    where
        E: StdError + ErrorClassification + 'static,
    {
        Self::custom(|err| {
            err.downcast_ref::<E>().map_or(true, <E as ErrorClassification>::is_retryable)
        })
    }

    /// Apply the condition, ignoring the permanent marker
    pub fn matches(&self, error: &(dyn StdError + 'static)) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Custom(predicate) => predicate(error),
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Lifecycle callbacks fired by the executor
///
/// Hooks run inline on the executing task; keep them short.
#[derive(Clone, Default)]
pub struct RetryHooks {
    on_retry: Option<RetryHook>,
    on_success: Option<SuccessHook>,
    on_max_attempts_reached: Option<ExhaustedHook>,
}

impl fmt::Debug for RetryHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHooks")
            .field("on_retry", &self.on_retry.is_some())
            .field("on_success", &self.on_success.is_some())
            .field("on_max_attempts_reached", &self.on_max_attempts_reached.is_some())
            .finish()
    }
}

impl RetryHooks {
    /// Fired after failed attempt `attempt` when another attempt will follow
    pub fn fire_retry(&self, attempt: u32, error: &(dyn StdError + 'static)) {
        if let Some(hook) = &self.on_retry {
            hook(attempt, error);
        }
    }

    /// Fired when attempt `attempt` succeeds
    pub fn fire_success(&self, attempt: u32) {
        if let Some(hook) = &self.on_success {
            hook(attempt);
        }
    }

    /// Fired once when the final allowed attempt fails
    pub fn fire_max_attempts_reached(&self, error: &(dyn StdError + 'static)) {
        if let Some(hook) = &self.on_max_attempts_reached {
            hook(error);
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Immutable retry policy shared by every execution of an executor
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    settings: RetrySettings,
    condition: RetryCondition,
    hooks: RetryHooks,
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Build a policy from declarative settings, with the default condition
    /// and no hooks
    pub fn from_settings(settings: RetrySettings) -> ConfigResult<Self> {
        settings.validate()?;
        Ok(Self { settings, condition: RetryCondition::default(), hooks: RetryHooks::default() })
    }

    /// Declarative part of the policy
    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    pub fn max_attempts(&self) -> u32 {
        self.settings.max_attempts
    }

    pub fn initial_interval(&self) -> Duration {
        self.settings.initial_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.settings.max_interval
    }

    pub fn multiplier(&self) -> f64 {
        self.settings.multiplier
    }

    pub fn jitter(&self) -> bool {
        self.settings.jitter
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.settings.max_duration
    }

    pub fn condition(&self) -> &RetryCondition {
        &self.condition
    }

    pub fn hooks(&self) -> &RetryHooks {
        &self.hooks
    }

    /// Backoff calculator derived from the policy
    pub fn backoff(&self) -> Backoff {
        self.settings.backoff()
    }

    /// Whether `error` may be retried: not permanent and accepted by the
    /// condition
    pub fn should_retry(&self, error: &(dyn StdError + 'static)) -> bool {
        !is_permanent(error) && self.condition.matches(error)
    }
}

/// Builder for [`RetryPolicy`]
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every declarative option at once
    #[must_use]
    pub fn settings(mut self, settings: RetrySettings) -> Self {
        self.policy.settings = settings;
        self
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.settings.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn initial_interval(mut self, interval: Duration) -> Self {
        self.policy.settings.initial_interval = interval;
        self
    }

    #[must_use]
    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.policy.settings.max_interval = interval;
        self
    }

    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.settings.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.policy.settings.jitter = enabled;
        self
    }

    /// Overall deadline, checked before each attempt
    #[must_use]
    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.policy.settings.max_duration = Some(duration);
        self
    }

    #[must_use]
    pub fn unlimited_duration(mut self) -> Self {
        self.policy.settings.max_duration = None;
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: RetryCondition) -> Self {
        self.policy.condition = condition;
        self
    }

    /// Shorthand for `condition(RetryCondition::custom(predicate))`
    #[must_use]
    pub fn retry_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        self.condition(RetryCondition::custom(predicate))
    }

    #[must_use]
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.policy.hooks.on_retry = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.policy.hooks.on_success = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn on_max_attempts_reached<F>(mut self, hook: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) + Send + Sync + 'static,
    {
        self.policy.hooks.on_max_attempts_reached = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.settings.validate()?;
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for retry policy construction and classification.
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::permanent;
    use crate::testing::TestError;

    /// Validates the documented defaults.
    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.initial_interval(), Duration::from_millis(100));
        assert_eq!(policy.max_interval(), Duration::from_secs(10));
        assert!((policy.multiplier() - 2.0).abs() < f64::EPSILON);
        assert!(policy.jitter());
        assert_eq!(policy.max_duration(), None);
        assert!(matches!(policy.condition(), RetryCondition::Always));
    }

    /// Validates that the builder keeps every option set before `build()`.
    ///
    /// Assertions:
    /// - Confirms options set in any order all survive
    /// - Confirms setting a condition does not reset hooks or settings
    #[test]
    fn test_builder_accumulates_all_options() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        let policy = RetryPolicy::builder()
            .on_success(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            })
            .max_attempts(7)
            .initial_interval(Duration::from_millis(5))
            .max_interval(Duration::from_millis(500))
            .multiplier(3.0)
            .jitter(false)
            .max_duration(Duration::from_secs(2))
            .condition(RetryCondition::Never)
            .build()
            .expect("valid policy");

        assert_eq!(policy.max_attempts(), 7);
        assert_eq!(policy.initial_interval(), Duration::from_millis(5));
        assert_eq!(policy.max_interval(), Duration::from_millis(500));
        assert!((policy.multiplier() - 3.0).abs() < f64::EPSILON);
        assert!(!policy.jitter());
        assert_eq!(policy.max_duration(), Some(Duration::from_secs(2)));
        assert!(matches!(policy.condition(), RetryCondition::Never));

        policy.hooks().fire_success(1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Validates rejection of out-of-range values.
    #[test]
    fn test_builder_rejects_invalid_values() {
        let err = RetryPolicy::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "max_attempts"));

        let err = RetryPolicy::builder().multiplier(0.5).build().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "multiplier"));

        assert!(RetryPolicy::builder().multiplier(f64::NAN).build().is_err());
        assert!(RetryPolicy::builder().multiplier(f64::INFINITY).build().is_err());

        let err = RetryPolicy::builder()
            .initial_interval(Duration::from_secs(5))
            .max_interval(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("initial_interval"));

        assert!(RetryPolicy::builder().max_duration(Duration::ZERO).build().is_err());
    }

    /// Validates conditions and the permanent marker override.
    #[test]
    fn test_should_retry() {
        let transient = io::Error::new(io::ErrorKind::TimedOut, "slow");
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");

        let policy = RetryPolicy::builder()
            .retry_if(|err| {
                err.downcast_ref::<io::Error>()
                    .map_or(true, |e| e.kind() != io::ErrorKind::PermissionDenied)
            })
            .build()
            .expect("valid policy");
        assert!(policy.should_retry(&transient));
        assert!(!policy.should_retry(&denied));

        let always = RetryPolicy::default();
        assert!(!always.should_retry(&permanent(io::Error::other("gone"))));

        let never = RetryPolicy::builder().condition(RetryCondition::Never).build().expect("valid");
        assert!(!never.should_retry(&transient));
    }

    /// Validates the classified condition defers to `ErrorClassification`.
    #[test]
    fn test_classified_condition() {
        let condition = RetryCondition::classified::<TestError>();
        assert!(condition.matches(&TestError::transient("flaky")));
        assert!(!condition.matches(&TestError::fatal("bad input")));
        // Unknown types stay retryable
        assert!(condition.matches(&io::Error::other("other")));
    }

    /// Validates settings round-trip into a policy.
    #[test]
    fn test_from_settings_round_trip() {
        let settings = RetrySettings {
            max_attempts: 4,
            initial_interval: Duration::from_millis(20),
            max_interval: Duration::from_millis(200),
            multiplier: 1.5,
            jitter: false,
            max_duration: Some(Duration::from_secs(1)),
        };
        let policy = RetryPolicy::from_settings(settings.clone()).expect("valid settings");
        assert_eq!(policy.settings(), &settings);
        assert_eq!(policy.backoff().base_delay(2), Duration::from_millis(30));

        let invalid = RetrySettings { max_attempts: 0, ..settings };
        assert!(RetryPolicy::from_settings(invalid).is_err());
    }

    #[test]
    fn test_hooks_debug_shows_registration() {
        let policy = RetryPolicy::builder().on_retry(|_, _| {}).build().expect("valid");
        let debug = format!("{:?}", policy.hooks());
        assert!(debug.contains("on_retry: true"));
        assert!(debug.contains("on_success: false"));
    }
}
