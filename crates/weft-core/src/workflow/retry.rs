//! Retry decisions and exponential backoff delays.
//!
//! Stateless: all logic lives in associated functions that take the policy
//! as a parameter. Attempts are 1-based (the first execution is attempt 1).

use std::time::Duration;

use weft_types::workflow::RetryPolicy;

/// Stateless retry handler for failed skill invocations.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt is allowed after `attempt` failed.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32) -> bool {
        attempt < policy.effective_max_attempts()
    }

    /// Deterministic part of the delay after `attempt` failed:
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(exponent);
        Self::cap(policy, Self::millis_to_duration(millis))
    }

    /// Backoff delay plus uniformly random jitter in `[0, jitter]`, capped at
    /// `max_delay`.
    pub fn jittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let base = Self::backoff_delay(policy, attempt);
        let Some(jitter_ms) = policy.jitter_ms.filter(|&j| j > 0) else {
            return base;
        };
        let extra = Duration::from_millis((rand::random::<f64>() * jitter_ms as f64) as u64);
        Self::cap(policy, base.saturating_add(extra))
    }

    fn cap(policy: &RetryPolicy, delay: Duration) -> Duration {
        match policy.max_delay() {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    fn millis_to_duration(millis: f64) -> Duration {
        if millis.is_nan() || millis <= 0.0 {
            return Duration::ZERO;
        }
        // Overflow (including infinity) saturates.
        Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32, base_ms: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy::exponential(max_attempts, Duration::from_millis(base_ms), multiplier)
    }

    #[test]
    fn test_should_retry_within_limit() {
        let p = policy(3, 100, 2.0);
        assert!(RetryHandler::should_retry(&p, 1));
        assert!(RetryHandler::should_retry(&p, 2));
        assert!(!RetryHandler::should_retry(&p, 3));
        assert!(!RetryHandler::should_retry(&p, 4));
    }

    #[test]
    fn test_single_attempt_never_retries() {
        assert!(!RetryHandler::should_retry(&RetryPolicy::default(), 1));
        assert!(!RetryHandler::should_retry(&policy(0, 100, 2.0), 1));
    }

    #[test]
    fn test_exponential_backoff() {
        let p = policy(5, 100, 2.0);
        assert_eq!(RetryHandler::backoff_delay(&p, 1), Duration::from_millis(100));
        assert_eq!(RetryHandler::backoff_delay(&p, 2), Duration::from_millis(200));
        assert_eq!(RetryHandler::backoff_delay(&p, 3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped_at_max_delay() {
        let p = policy(10, 100, 10.0).with_max_delay(Duration::from_secs(1));
        assert_eq!(RetryHandler::backoff_delay(&p, 2), Duration::from_secs(1));
        assert_eq!(RetryHandler::backoff_delay(&p, 9), Duration::from_secs(1));
    }

    #[test]
    fn test_huge_exponent_does_not_overflow() {
        let p = policy(u32::MAX, 1000, 10.0);
        assert_eq!(RetryHandler::backoff_delay(&p, 500), Duration::MAX);
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy(3, 100, 2.0).with_jitter(Duration::from_millis(50));
        for _ in 0..100 {
            let d = RetryHandler::jittered_delay(&p, 1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150), "{d:?}");
        }
    }

    #[test]
    fn test_jitter_respects_cap() {
        let p = policy(3, 100, 2.0)
            .with_jitter(Duration::from_millis(500))
            .with_max_delay(Duration::from_millis(120));
        for _ in 0..50 {
            assert!(RetryHandler::jittered_delay(&p, 1) <= Duration::from_millis(120));
        }
    }
}
