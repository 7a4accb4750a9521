use std::time::Duration;

use super::HubError;

/// Bounded exponential backoff for hub requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_wait.saturating_mul(factor).min(self.max_wait)
    }

    /// Rate limiting is always retried; other transient failures only when
    /// the request is marked retryable.
    pub fn should_retry(&self, error: &HubError, retryable: bool) -> bool {
        matches!(error, HubError::RateLimited) || (retryable && error.is_transient())
    }
}
