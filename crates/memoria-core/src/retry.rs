//! Exponential backoff for transient provider failures.
//!
//! The policy only computes delays and budgets. Retry state itself
//! (attempt count, next eligible time) lives on the chunk row, so a restart
//! picks up exactly where the previous process left off.

use std::time::Duration;

use chrono::{DateTime, Utc};
use memoria_types::config::RetryPolicyConfig;
use memoria_types::error::EmbedError;

/// Upper bound on a provider `Retry-After` hint.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// What the coordinator should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule another attempt no earlier than `at`.
    RetryAt(DateTime<Utc>),
    /// Record a terminal failure.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryPolicyConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// True when another attempt is allowed after `attempts` have been made.
    pub fn has_budget(&self, attempts: u32) -> bool {
        attempts < self.config.max_attempts
    }

    /// Backoff before the attempt following attempt number `attempt` (1-based).
    ///
    /// `unit` is a sample in `[0, 1)` used for jitter; the delay is scaled by
    /// `1 + jitter * (2 * unit - 1)`.
    pub fn delay_with(&self, attempt: u32, unit: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let raw = self.config.base_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64);
        let unit = unit.clamp(0.0, 1.0);
        let scale = 1.0 + self.config.jitter * (2.0 * unit - 1.0);
        Duration::from_millis((capped * scale).max(0.0).round() as u64)
    }

    /// Backoff with a random jitter sample.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with(attempt, rand::random::<f64>())
    }

    /// Decide the fate of attempt number `attempt` that failed with `error`.
    ///
    /// Permanent errors never retry. A provider `Retry-After` hint raises the
    /// computed delay but never lowers it, and is clamped to
    /// [`MAX_RETRY_AFTER`].
    pub fn decide(&self, attempt: u32, error: &EmbedError, now: DateTime<Utc>) -> RetryDecision {
        if !error.is_transient() || !self.has_budget(attempt) {
            return RetryDecision::GiveUp;
        }
        let mut delay = self.delay(attempt);
        if let Some(hint) = error.retry_after_ms {
            delay = delay.max(Duration::from_millis(hint).min(MAX_RETRY_AFTER));
        }
        RetryDecision::RetryAt(self.schedule(now, delay))
    }

    fn schedule(&self, now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .or_else(|| {
                let cap = chrono::Duration::milliseconds(self.config.max_delay_ms.min(i64::MAX as u64) as i64);
                now.checked_add_signed(cap)
            })
            .unwrap_or(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_types::error::ErrorCode;

    fn policy(jitter: f64) -> RetryPolicy {
        RetryPolicy::new(RetryPolicyConfig {
            max_attempts: 3,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 1_000,
            jitter,
        })
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let p = policy(0.0);
        assert_eq!(p.delay_with(1, 0.5), Duration::from_millis(100));
        assert_eq!(p.delay_with(2, 0.5), Duration::from_millis(200));
        assert_eq!(p.delay_with(3, 0.5), Duration::from_millis(400));
        assert_eq!(p.delay_with(10, 0.5), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy(0.2);
        assert_eq!(p.delay_with(1, 0.0), Duration::from_millis(80));
        assert_eq!(p.delay_with(1, 1.0), Duration::from_millis(120));
        for _ in 0..100 {
            let d = p.delay(2).as_millis();
            assert!((160..=240).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn test_permanent_error_gives_up_immediately() {
        let p = policy(0.0);
        let err = EmbedError::permanent(ErrorCode::InvalidArgument, "bad input");
        assert_eq!(p.decide(1, &err, Utc::now()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_budget_exhaustion() {
        let p = policy(0.0);
        let err = EmbedError::transient(ErrorCode::Internal, "503");
        let now = Utc::now();
        assert!(matches!(p.decide(2, &err, now), RetryDecision::RetryAt(_)));
        assert_eq!(p.decide(3, &err, now), RetryDecision::GiveUp);
    }

    #[test]
    fn test_retry_after_hint_extends_delay() {
        let p = policy(0.0);
        let now = Utc::now();
        let err = EmbedError::rate_limited(Some(5_000));
        match p.decide(1, &err, now) {
            RetryDecision::RetryAt(at) => {
                assert_eq!((at - now).num_milliseconds(), 5_000);
            }
            RetryDecision::GiveUp => panic!("expected a retry"),
        }
    }

    #[test]
    fn test_huge_retry_after_hint_is_clamped() {
        let p = policy(0.0);
        let now = Utc::now();
        let err = EmbedError::rate_limited(Some(u64::MAX));
        match p.decide(1, &err, now) {
            RetryDecision::RetryAt(at) => {
                let ceiling = chrono::Duration::from_std(MAX_RETRY_AFTER).unwrap();
                assert_eq!(at - now, ceiling);
            }
            RetryDecision::GiveUp => panic!("expected a retry"),
        }
    }

    #[test]
    fn test_schedule_near_end_of_time_does_not_overflow() {
        let p = policy(0.0);
        let err = EmbedError::rate_limited(Some(u64::MAX));
        let end = DateTime::<Utc>::MAX_UTC - chrono::Duration::seconds(1);
        match p.decide(1, &err, end) {
            RetryDecision::RetryAt(at) => assert!(at >= end),
            RetryDecision::GiveUp => panic!("expected a retry"),
        }
    }
}
