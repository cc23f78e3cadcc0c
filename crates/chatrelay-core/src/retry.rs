//! Retry policy applied uniformly by the completion client.

use std::str::FromStr;
use std::time::Duration;

use crate::error::CompletionError;

/// Default delay before the first backed-off retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Upper bound on any single backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// How many attempts a single request may make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptLimit {
    /// Try each configured key once.
    AllKeys,
    /// A fixed count, rotating keys (and wrapping) between attempts.
    Fixed(u32),
}

impl Default for AttemptLimit {
    fn default() -> Self {
        AttemptLimit::AllKeys
    }
}

impl FromStr for AttemptLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(AttemptLimit::AllKeys);
        }
        match s.parse::<u32>() {
            Ok(0) => Err("attempt count must be at least 1".to_string()),
            Ok(n) => Ok(AttemptLimit::Fixed(n)),
            Err(e) => Err(format!("expected 'all' or a positive number: {}", e)),
        }
    }
}

/// Max attempts, exponential backoff schedule and retryable-error predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: AttemptLimit,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: AttemptLimit::default(),
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            multiplier: 2,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries every key once without waiting.
    pub fn each_key_once() -> Self {
        Self {
            max_attempts: AttemptLimit::AllKeys,
            initial_backoff: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, limit: AttemptLimit) -> Self {
        self.max_attempts = limit;
        self
    }

    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Attempt budget for a pool of `key_count` keys.
    pub fn attempts_for(&self, key_count: usize) -> usize {
        match self.max_attempts {
            AttemptLimit::AllKeys => key_count,
            AttemptLimit::Fixed(n) => n as usize,
        }
    }

    /// Delay before retry number `retry` (1 = the second attempt).
    ///
    /// `initial * multiplier^(retry - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 || self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1).saturating_pow(retry - 1);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Whether the loop should make another attempt after `err`.
    pub fn should_retry(&self, err: &CompletionError, attempts_made: usize, budget: usize) -> bool {
        attempts_made < budget && err.is_retryable()
    }

    /// Wait to apply after attempt number `attempts_made` failed with `err`.
    pub fn delay_after(&self, err: &CompletionError, attempts_made: usize) -> Duration {
        if err.wants_backoff() {
            self.backoff(attempts_made as u32)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_schedule_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(10), DEFAULT_MAX_BACKOFF);
        assert_eq!(policy.backoff(u32::MAX), DEFAULT_MAX_BACKOFF);
    }

    #[test]
    fn test_attempt_budget() {
        let default = RetryPolicy::default();
        assert_eq!(default.attempts_for(5), 5);

        let fixed = RetryPolicy::default().with_max_attempts(AttemptLimit::Fixed(3));
        assert_eq!(fixed.attempts_for(5), 3);
    }

    #[test]
    fn test_credential_errors_skip_backoff() {
        let policy = RetryPolicy::default();
        let rejected = CompletionError::CredentialRejected { status: 401 };
        assert_eq!(policy.delay_after(&rejected, 1), Duration::ZERO);
        assert_eq!(
            policy.delay_after(&CompletionError::RateLimited, 1),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&CompletionError::RateLimited, 1, 3));
        assert!(!policy.should_retry(&CompletionError::RateLimited, 3, 3));
        assert!(!policy.should_retry(&CompletionError::NoKeys, 1, 3));
    }

    #[test]
    fn test_attempt_limit_parse() {
        assert_eq!("all".parse::<AttemptLimit>(), Ok(AttemptLimit::AllKeys));
        assert_eq!("4".parse::<AttemptLimit>(), Ok(AttemptLimit::Fixed(4)));
        assert!("0".parse::<AttemptLimit>().is_err());
        assert!("many".parse::<AttemptLimit>().is_err());
    }
}
