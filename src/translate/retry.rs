//! Exponential backoff: delay(attempt) = min(base * 2^attempt, cap).
//! Each logical operation keeps its own attempt counter.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    cap: Duration,
    max_retries: u32,
}

impl RetryPolicy {
    /// 1s base, 10s cap.
    pub fn new(max_retries: u32) -> Self {
        Self::with_timing(max_retries, Duration::from_secs(1), Duration::from_secs(10))
    }

    pub fn with_timing(max_retries: u32, base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        // 2^31 seconds is far past any sane cap; saturate instead of overflowing.
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    #[inline]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_sequence_doubles_then_caps() {
        let policy = RetryPolicy::new(3);
        let delays: Vec<u64> = (0..5).map(|a| policy.next_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10]);
    }

    #[test]
    fn huge_attempt_stays_at_cap() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.next_delay(64), Duration::from_secs(10));
    }

    #[test]
    fn should_retry_is_strictly_below_max() {
        let policy = RetryPolicy::new(3);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!RetryPolicy::new(0).should_retry(0));
    }
}
