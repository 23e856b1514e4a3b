//! Engine configuration
//!
//! Declarative settings for an executor and its circuit breaker, loaded
//! from TOML or JSON and optionally overlaid with environment variables.
//!
//! ## Environment Variables
//! - `STEADFAST_NAME`: executor name, used as the metrics `scope`
//! - `STEADFAST_RETRY_MAX_ATTEMPTS`: total invocations allowed
//! - `STEADFAST_RETRY_INITIAL_INTERVAL_MS`: delay before the first retry
//! - `STEADFAST_RETRY_MAX_INTERVAL_MS`: cap on the un-jittered delay
//! - `STEADFAST_RETRY_MULTIPLIER`: exponential growth factor
//! - `STEADFAST_RETRY_JITTER`: whether delays are jittered (true/false)
//! - `STEADFAST_RETRY_MAX_DURATION_MS`: overall deadline, `0` removes it
//! - `STEADFAST_BREAKER_MAX_FAILURES`: failures that open the circuit
//! - `STEADFAST_BREAKER_RESET_TIMEOUT_MS`: open-state wait before a trial
//!
//! ## File Format
//! ```toml
//! name = "payments"
//!
//! [retry]
//! max_attempts = 5
//! initial_interval_ms = 50
//! max_interval_ms = 2000
//! multiplier = 2.0
//! jitter = true
//! max_duration_ms = 10000
//!
//! [circuit_breaker]
//! max_failures = 3
//! reset_timeout_ms = 30000
//! ```

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::observability::MetricsCollector;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
use crate::retry::constants::DEFAULT_SCOPE;
use crate::retry::{RetryExecutor, RetryPolicy, RetrySettings};

const ENV_PREFIX: &str = "STEADFAST_";

/// Complete declarative configuration of one executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Executor name, reported as the `scope` metrics label
    pub name: String,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SCOPE.to_string(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed input and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::parse("TOML", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a JSON document
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` for malformed input and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_json_str(contents: &str) -> ConfigResult<Self> {
        let config: Self =
            serde_json::from_str(contents).map_err(|e| ConfigError::parse("JSON", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file, format chosen by extension
    ///
    /// # Errors
    /// Returns `ConfigError::NotFound` if the file does not exist,
    /// `ConfigError::Io` if it cannot be read, and `ConfigError::Parse` for
    /// an unsupported extension or malformed contents.
    pub fn load_from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound { path: path.to_path_buf() });
        }

        tracing::info!(path = %path.display(), "Loading engine configuration from file");

        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
        match extension.to_ascii_lowercase().as_str() {
            "toml" => Self::from_toml_str(&contents),
            "json" => Self::from_json_str(&contents),
            other => Err(ConfigError::parse(
                "file",
                format!("unsupported config format '{other}' for {}", path.display()),
            )),
        }
    }

    /// Overlay `STEADFAST_*` environment variables, then validate
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if a variable cannot be parsed or the
    /// resulting configuration is out of range.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Overlay overrides read through `lookup`, then validate
    ///
    /// `lookup` receives full variable names such as
    /// `STEADFAST_RETRY_MAX_ATTEMPTS`. Unset variables leave the current
    /// value untouched.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if a value cannot be parsed or the
    /// resulting configuration is out of range.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            let key = format!("{ENV_PREFIX}{suffix}");
            lookup(&key).map(|value| (key, value.trim().to_string()))
        };

        if let Some((_, name)) = get("NAME") {
            if !name.is_empty() {
                self.name = name;
            }
        }

        if let Some((key, value)) = get("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_INITIAL_INTERVAL_MS") {
            self.retry.initial_interval = Duration::from_millis(parse_value(&key, &value)?);
        }
        if let Some((key, value)) = get("RETRY_MAX_INTERVAL_MS") {
            self.retry.max_interval = Duration::from_millis(parse_value(&key, &value)?);
        }
        if let Some((key, value)) = get("RETRY_MULTIPLIER") {
            self.retry.multiplier = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_JITTER") {
            self.retry.jitter = parse_bool(&key, &value)?;
        }
        if let Some((key, value)) = get("RETRY_MAX_DURATION_MS") {
            let millis: u64 = parse_value(&key, &value)?;
            self.retry.max_duration = (millis > 0).then(|| Duration::from_millis(millis));
        }

        if let Some((key, value)) = get("BREAKER_MAX_FAILURES") {
            self.circuit_breaker.max_failures = parse_value(&key, &value)?;
        }
        if let Some((key, value)) = get("BREAKER_RESET_TIMEOUT_MS") {
            self.circuit_breaker.reset_timeout = Duration::from_millis(parse_value(&key, &value)?);
        }

        self.validate()
    }

    /// Validate every section
    ///
    /// # Errors
    /// Returns the first `ConfigError::Invalid` found.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        self.retry.validate()?;
        self.circuit_breaker.validate()
    }

    /// Policy built from the retry section
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the retry section is out of range.
    pub fn build_policy(&self) -> ConfigResult<RetryPolicy> {
        RetryPolicy::from_settings(self.retry.clone())
    }

    /// Executor named after this configuration, reporting to `metrics`
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the retry section is out of range.
    pub fn build_executor(
        &self,
        metrics: Arc<dyn MetricsCollector>,
    ) -> ConfigResult<RetryExecutor> {
        Ok(RetryExecutor::builder()
            .name(self.name.clone())
            .policy(self.build_policy()?)
            .metrics(metrics)
            .build())
    }

    /// Circuit breaker over `executor`, scoped by this configuration's name
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if the breaker section is out of range.
    pub fn build_circuit_breaker(&self, executor: RetryExecutor) -> ConfigResult<CircuitBreaker> {
        CircuitBreaker::new(self.name.clone(), executor, self.circuit_breaker.clone())
    }
}

fn parse_value<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse::<T>().map_err(|e| ConfigError::invalid(key, format!("'{value}': {e}")))
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(key: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{value}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::observability::InMemoryMetricsCollector;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.name, "default");
        assert!(config.validate().is_ok());
    }

    /// Validates a partial TOML document keeps defaults for missing keys.
    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
name = "payments"

[retry]
max_attempts = 5
max_duration_ms = 2500
"#,
        )
        .expect("valid toml");

        assert_eq!(config.name, "payments");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_duration, Some(Duration::from_millis(2500)));
        assert_eq!(config.retry.initial_interval, RetrySettings::default().initial_interval);
        assert_eq!(config.circuit_breaker, CircuitBreakerConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = EngineConfig::from_json_str(r#"{"retry": {"max_attempts": 0}}"#)
            .expect_err("zero attempts");
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "max_attempts"));

        let err = EngineConfig::from_json_str(r#"{"circuit_breaker": {"max_failures": 0}}"#)
            .expect_err("zero failures");
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "max_failures"));

        let err = EngineConfig::from_toml_str("retry = 3").expect_err("wrong shape");
        assert!(matches!(err, ConfigError::Parse { ref format, .. } if format == "TOML"));
    }

    /// Validates environment-style overrides.
    ///
    /// Assertions:
    /// - Confirms every recognised variable is applied
    /// - Confirms `0` clears the deadline
    #[test]
    fn test_overrides_apply() {
        let mut config = EngineConfig::default();
        config.retry.max_duration = Some(Duration::from_secs(5));

        config
            .apply_overrides_from(lookup(&[
                ("STEADFAST_NAME", "billing"),
                ("STEADFAST_RETRY_MAX_ATTEMPTS", "7"),
                ("STEADFAST_RETRY_INITIAL_INTERVAL_MS", "20"),
                ("STEADFAST_RETRY_MAX_INTERVAL_MS", "400"),
                ("STEADFAST_RETRY_MULTIPLIER", "1.5"),
                ("STEADFAST_RETRY_JITTER", "off"),
                ("STEADFAST_RETRY_MAX_DURATION_MS", "0"),
                ("STEADFAST_BREAKER_MAX_FAILURES", "2"),
                ("STEADFAST_BREAKER_RESET_TIMEOUT_MS", "1500"),
            ]))
            .expect("overrides apply");

        assert_eq!(config.name, "billing");
        assert_eq!(config.retry.max_attempts, 7);
        assert_eq!(config.retry.initial_interval, Duration::from_millis(20));
        assert_eq!(config.retry.max_interval, Duration::from_millis(400));
        assert!((config.retry.multiplier - 1.5).abs() < f64::EPSILON);
        assert!(!config.retry.jitter);
        assert_eq!(config.retry.max_duration, None);
        assert_eq!(config.circuit_breaker.max_failures, 2);
        assert_eq!(config.circuit_breaker.reset_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_override_parse_errors() {
        let mut config = EngineConfig::default();
        let err = config
            .apply_overrides_from(lookup(&[("STEADFAST_RETRY_MAX_ATTEMPTS", "many")]))
            .expect_err("not a number");
        let ConfigError::Invalid { field, .. } = err else {
            panic!("expected Invalid, got {err:?}");
        };
        assert_eq!(field, "STEADFAST_RETRY_MAX_ATTEMPTS");

        let err = config
            .apply_overrides_from(lookup(&[("STEADFAST_RETRY_JITTER", "maybe")]))
            .expect_err("not a boolean");
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_parse_bool_variants() {
        for truthy in ["1", "true", "YES", "On"] {
            assert!(parse_bool("k", truthy).expect("truthy"));
        }
        for falsy in ["0", "False", "no", "OFF"] {
            assert!(!parse_bool("k", falsy).expect("falsy"));
        }
    }

    /// Validates the built executor and breaker carry the configuration.
    #[test]
    fn test_build_components() {
        let mut config = EngineConfig::default();
        config.name = "inventory".to_string();
        config.retry.max_attempts = 4;
        config.circuit_breaker.max_failures = 9;

        let executor =
            config.build_executor(Arc::new(InMemoryMetricsCollector::new())).expect("executor");
        assert_eq!(executor.name(), "inventory");
        assert_eq!(executor.policy().max_attempts(), 4);

        let breaker = config.build_circuit_breaker(executor).expect("breaker");
        assert_eq!(breaker.scope(), "inventory");
        assert_eq!(breaker.config().max_failures, 9);
    }
}
