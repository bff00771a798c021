//! Exponential backoff policy for transient store errors.

use std::time::{Duration, Instant};

/// Backoff `base × 2^(n-1)` for attempt `n`, up to `attempts` total tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `n` (1-based). `None` when `n` exceeds the
    /// attempt budget.
    pub fn delay_before(&self, n: u32) -> Option<Duration> {
        if n >= self.attempts {
            return None;
        }
        let factor = 1u32.checked_shl(n.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(self.base_delay.saturating_mul(factor))
    }

    /// Like [`delay_before`](Self::delay_before), but refuses a retry whose
    /// backoff would run past `deadline` (the remaining cycle budget).
    pub fn delay_within(&self, n: u32, deadline: Option<Instant>) -> Option<Duration> {
        let delay = self.delay_before(n)?;
        if let Some(deadline) = deadline
            && Instant::now() + delay >= deadline
        {
            return None;
        }
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy::new(4, Duration::from_millis(50));
        assert_eq!(policy.delay_before(1), Some(Duration::from_millis(50)));
        assert_eq!(policy.delay_before(2), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_before(3), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_before(4), None);
    }

    #[test]
    fn single_attempt_never_retries() {
        let policy = RetryPolicy::new(1, Duration::from_millis(50));
        assert_eq!(policy.delay_before(1), None);
    }

    #[test]
    fn deadline_cuts_retries_short() {
        let policy = RetryPolicy::new(5, Duration::from_millis(50));
        let passed = Some(Instant::now() - Duration::from_millis(1));
        assert_eq!(policy.delay_within(1, passed), None);
        let generous = Some(Instant::now() + Duration::from_secs(10));
        assert!(policy.delay_within(1, generous).is_some());
    }
}
