//! Exponential backoff calculator
//!
//! `delay(n) = min(initial * multiplier^(n-1), max_interval)` for attempt
//! numbers starting at 1. With jitter enabled the capped delay is scaled by a
//! random factor in `[0.5, 1.5)`, so a jittered delay may exceed
//! `max_interval` by up to half.

use std::ops::Range;
use std::time::Duration;

use rand::Rng;

use super::constants::{
    DEFAULT_INITIAL_INTERVAL, DEFAULT_JITTER, DEFAULT_MAX_INTERVAL, DEFAULT_MULTIPLIER,
    JITTER_MIN_FACTOR, JITTER_SPAN,
};

/// Backoff parameters of a retry policy
///
/// Pure and cheap to copy; the policy validates the parameters before a
/// `Backoff` is ever handed to an executor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl Backoff {
    /// Capped exponential delay for `attempt`, without jitter
    ///
    /// Attempt 0 is treated as attempt 1. Exponents too large to represent
    /// clamp to `max_interval`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.max(1) - 1).unwrap_or(i32::MAX);
        let max_nanos = as_nanos_f64(self.max_interval);
        let raw = as_nanos_f64(self.initial_interval) * self.multiplier.powi(exponent);

        let capped = if raw.is_finite() { raw.clamp(0.0, max_nanos) } else { max_nanos };
        from_nanos_f64(capped)
    }

    /// Delay for `attempt`, jittered with the thread-local RNG when enabled
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Delay for `attempt`, jittered with `rng` when enabled
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base;
        }
        let factor = JITTER_MIN_FACTOR + rng.gen::<f64>() * JITTER_SPAN;
        from_nanos_f64(as_nanos_f64(base) * factor)
    }

    /// Half-open range `[0.5 * base, 1.5 * base)` a jittered delay falls in
    ///
    /// Without jitter the range collapses to `base..base`.
    pub fn jitter_bounds(&self, attempt: u32) -> Range<Duration> {
        let base = self.base_delay(attempt);
        if !self.jitter {
            return base..base;
        }
        let nanos = as_nanos_f64(base);
        let low = from_nanos_f64(nanos * JITTER_MIN_FACTOR);
        let high = from_nanos_f64(nanos * (JITTER_MIN_FACTOR + JITTER_SPAN));
        low..high
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_nanos_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64
}

// `as` saturates on float-to-int casts, so out of range values clamp
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn from_nanos_f64(nanos: f64) -> Duration {
    Duration::from_nanos(nanos.max(0.0) as u64)
}
