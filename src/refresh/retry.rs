//! Retry policy for failed refreshes.
//!
//! Implements exponential backoff with configurable parameters.

use crate::config::RetrySettings;
use crate::error::EngineError;
use std::time::Duration;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries before the collection is parked.
    pub max_retries: u32,
    /// Initial backoff duration in seconds.
    pub initial_backoff_secs: u64,
    /// Maximum backoff duration in seconds (cap for exponential growth).
    pub max_backoff_secs: u64,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_backoff_secs: settings.initial_backoff_secs,
            max_backoff_secs: settings.max_backoff_secs,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }

    /// Backoff before the next attempt, given how many failures the
    /// collection has accumulated so far.
    ///
    /// Uses exponential backoff: `initial_backoff * multiplier^retry_count`,
    /// capped at `max_backoff_secs`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let backoff =
            self.initial_backoff_secs as f64 * self.backoff_multiplier.powi(retry_count as i32);
        Duration::from_secs(backoff.min(self.max_backoff_secs as f64) as u64)
    }

    /// Whether a failed refresh should be attempted again.
    ///
    /// Only transient failures are retried, and only while the retry count
    /// is below `max_retries`.
    pub fn should_retry(&self, error: &EngineError, retry_count: u32) -> bool {
        error.is_retryable() && retry_count < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&RetrySettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = make_policy();
        assert_eq!(policy.backoff(0), Duration::from_secs(30));
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_backoff_secs: 100,
            ..make_policy()
        };
        assert_eq!(policy.backoff(10), Duration::from_secs(100));
    }

    #[test]
    fn test_should_retry_respects_budget_and_error_kind() {
        let policy = make_policy();
        let transient = EngineError::TransientEvaluation("catalog down".to_string());
        let validation = EngineError::Validation("bad rules".to_string());

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&validation, 0));
    }
}
