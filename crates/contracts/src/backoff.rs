//! Exponential backoff policy shared by the queue and notification channels

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub base: Duration,
    /// Delay ceiling
    pub max: Duration,
    /// Maximum number of re-executions after the first attempt
    pub max_retries: u32,
}

impl BackoffPolicy {
    /// Create a policy from millisecond bounds
    pub fn from_millis(base_ms: u64, max_ms: u64, max_retries: u32) -> Self {
        Self {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms),
            max_retries,
        }
    }

    /// Delay before retry number `retry` (1-based): `min(base * 2^(retry-1), max)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Whether another retry is allowed after `retries_done` re-executions
    pub fn allows_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Upper bound on total executions
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_millis(1000, 30_000, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_until_ceiling() {
        let policy = BackoffPolicy::from_millis(1000, 30_000, 10);
        let delays: Vec<u64> = (1..=7)
            .map(|k| policy.delay_for(k).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_huge_retry_number_saturates() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(u32::MAX), policy.max);
        assert_eq!(policy.delay_for(0), policy.base);
    }

    #[test]
    fn test_retry_budget() {
        let policy = BackoffPolicy::default();
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert_eq!(policy.max_attempts(), 4);
    }
}
