//! Exponential backoff schedules

use std::time::Duration;

use crate::core::constants::{
    COALESCE_POLL_BASE_DELAY_MS, COALESCE_POLL_MAX_ATTEMPTS, COALESCE_POLL_MAX_DELAY_MS,
    COALESCE_POLL_MULTIPLIER,
};

/// Exponential backoff schedule with a per-delay cap and bounded attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for Backoff {
    /// The follower polling schedule used by request coalescing
    fn default() -> Self {
        Self {
            base: Duration::from_millis(COALESCE_POLL_BASE_DELAY_MS),
            multiplier: COALESCE_POLL_MULTIPLIER,
            max_delay: Duration::from_millis(COALESCE_POLL_MAX_DELAY_MS),
            max_attempts: COALESCE_POLL_MAX_ATTEMPTS,
        }
    }
}

impl Backoff {
    /// Delay before attempt `attempt` (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.base.as_millis() as f64 * factor;
        let cap = self.max_delay.as_millis() as f64;
        if !millis.is_finite() || millis >= cap {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Every delay of the schedule, in order
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts).map(|attempt| self.delay(attempt))
    }

    /// Total time spent sleeping if every attempt is used
    pub fn total_budget(&self) -> Duration {
        self.delays().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_grow_then_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(150));
        assert_eq!(backoff.delay(2), Duration::from_millis(225));
        assert_eq!(backoff.delay(10), Duration::from_millis(2_000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(2_000));
    }

    #[test]
    fn test_delays_length() {
        let backoff = Backoff {
            max_attempts: 5,
            ..Backoff::default()
        };
        assert_eq!(backoff.delays().count(), 5);
    }

    #[test]
    fn test_default_budget_exceeds_lock_ttl() {
        let budget = Backoff::default().total_budget();
        assert!(budget > Duration::from_secs(30), "budget was {:?}", budget);
        assert!(budget < Duration::from_secs(45), "budget was {:?}", budget);
    }

    #[test]
    fn test_zero_attempts_has_no_budget() {
        let backoff = Backoff {
            max_attempts: 0,
            ..Backoff::default()
        };
        assert_eq!(backoff.total_budget(), Duration::ZERO);
    }
}
