//! Retry policy for transient device failures
//!
//! The policy is a pure function of the error class and the attempt number;
//! the gateway owns the loop, the sleeping and the bookkeeping.

use crate::config::RetryConfig;
use crate::error::{ErrorClass, GatewayError};
use std::time::Duration;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn single_attempt() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Decide after attempt number `attempt` (starting at 1) failed with `class`
    pub fn decide(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        if class == ErrorClass::Terminal || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt))
    }

    /// Delay before the retry that follows `attempt`: base × 2^(attempt-1), capped
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Outcome of a single driver attempt, classified for the retry loop
#[derive(Debug)]
pub enum Attempt<T> {
    Ok(T),
    Transient(GatewayError),
    Terminal(GatewayError),
}

impl<T> From<crate::error::Result<T>> for Attempt<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(v) => Attempt::Ok(v),
            Err(e) => match e.class() {
                ErrorClass::Transient => Attempt::Transient(e),
                ErrorClass::Terminal => Attempt::Terminal(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }

    #[test]
    fn transient_failures_back_off_exponentially() {
        let p = policy();
        assert_eq!(
            p.decide(ErrorClass::Transient, 1),
            RetryDecision::RetryAfter(Duration::from_secs(1))
        );
        assert_eq!(
            p.decide(ErrorClass::Transient, 2),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(p.decide(ErrorClass::Transient, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn terminal_failures_never_retry() {
        assert_eq!(policy().decide(ErrorClass::Terminal, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn delays_are_non_decreasing_and_capped() {
        let p = RetryPolicy {
            max_attempts: 40,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        };
        let mut previous = Duration::ZERO;
        for attempt in 1..40 {
            let d = p.delay_for(attempt);
            assert!(d >= previous);
            assert!(d <= Duration::from_secs(10));
            previous = d;
        }
        assert_eq!(previous, Duration::from_secs(10));
    }

    #[test]
    fn single_attempt_gives_up_immediately() {
        assert_eq!(
            RetryPolicy::single_attempt().decide(ErrorClass::Transient, 1),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn attempt_classifies_results() {
        let ok: Attempt<u16> = Ok(7).into();
        assert!(matches!(ok, Attempt::Ok(7)));
        let t: Attempt<u16> = Err(GatewayError::timeout("slow")).into();
        assert!(matches!(t, Attempt::Transient(_)));
        let d: Attempt<u16> = Err(GatewayError::decoding("garbage")).into();
        assert!(matches!(d, Attempt::Terminal(_)));
    }

    #[test]
    fn zero_attempt_config_still_makes_one_attempt() {
        let p = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            base_delay_ms: 10,
            max_delay_ms: 10,
        });
        assert_eq!(p.max_attempts, 1);
    }
}
