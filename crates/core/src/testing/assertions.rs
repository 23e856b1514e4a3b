//! Custom assertions for timing-sensitive tests

use std::time::Duration;

/// Assert that `actual` lies within `expected ± tolerance`
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use steadfast_core::testing::assert_duration_in_range;
///
/// let actual = Duration::from_millis(105);
/// assert_duration_in_range(actual, Duration::from_millis(100), Duration::from_millis(10));
/// ```
#[allow(clippy::panic)]
pub fn assert_duration_in_range(actual: Duration, expected: Duration, tolerance: Duration) {
    let min = expected.saturating_sub(tolerance);
    let max = expected.saturating_add(tolerance);

    assert!(actual >= min && actual <= max, "Duration {actual:?} not in range [{min:?}, {max:?}]");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_in_range_accepts_bounds() {
        let expected = Duration::from_millis(100);
        let tolerance = Duration::from_millis(10);
        assert_duration_in_range(Duration::from_millis(90), expected, tolerance);
        assert_duration_in_range(Duration::from_millis(110), expected, tolerance);
    }

    #[test]
    #[should_panic(expected = "not in range")]
    fn test_duration_out_of_range_panics() {
        assert_duration_in_range(
            Duration::from_millis(200),
            Duration::from_millis(100),
            Duration::from_millis(10),
        );
    }

    /// Validates the lower bound saturates at zero.
    #[test]
    fn test_tolerance_larger_than_expected() {
        let tolerance = Duration::from_millis(50);
        assert_duration_in_range(Duration::ZERO, Duration::from_millis(5), tolerance);
    }
}
