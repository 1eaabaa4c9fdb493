//! Retry policy and exponential backoff

use std::time::Duration;

/// Default delay before the first retry
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
/// Default ceiling on any single retry delay
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(300);
/// Default number of failed attempts before an operation is parked as failed
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Retry budget and backoff schedule for transient send failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (1-indexed):
    /// `min(backoff_base * 2^(attempt - 1), backoff_max)`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.backoff_max)
    }

    /// Whether `retry_count` failures have used up the budget
    #[must_use]
    pub const fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_schedule_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let delays = (1..=10)
            .map(|attempt| policy.delay(attempt).as_secs())
            .collect::<Vec<_>>();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300]);
    }

    #[test]
    fn delay_is_monotonic_and_bounded() {
        let policy = RetryPolicy {
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(45),
            max_retries: 50,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = policy.delay(attempt);
            assert!(delay >= previous, "attempt {attempt}");
            assert!(delay <= policy.backoff_max, "attempt {attempt}");
            previous = delay;
        }
    }

    #[test]
    fn attempt_zero_is_treated_as_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), policy.delay(1));
    }

    #[test]
    fn huge_attempt_numbers_saturate_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(u32::MAX), DEFAULT_BACKOFF_MAX);
    }

    #[test]
    fn budget_exhausts_at_max_retries() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_exhausted(9));
        assert!(policy.is_exhausted(10));
    }
}
