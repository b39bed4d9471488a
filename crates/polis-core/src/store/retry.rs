// ── Reconnection policy ──
//
// Bounded exponential backoff for a store's degraded-state recovery:
// `delay = min(base * 2^attempt, cap)`, for a fixed number of attempts.
// The loop consuming this lives in the store; each delay is cancellable.

use std::time::Duration;

/// Backoff tuning for a store's reconnection sequence.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Attempts before the store gives up and stays degraded.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given (zero-based) attempt.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.min(30)).unwrap_or(30);
        let raw = self.base_delay.as_secs_f64() * 2.0_f64.powi(exp);
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn delay_caps_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(4), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(30), Duration::from_secs(10));
        assert_eq!(policy.backoff_delay(u32::MAX), Duration::from_secs(10));
    }
}
