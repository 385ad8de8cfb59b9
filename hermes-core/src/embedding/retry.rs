//! Retry logic for provider calls
//!
//! Exponential backoff with optional jitter. Only errors whose
//! [`ProviderError::is_retryable`] holds are re-issued.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::config::RetrySettings;
use crate::provider::ProviderError;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, first try included
    pub max_attempts: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Add up to 25% jitter to each delay
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay,
            max_delay: settings.max_delay,
            backoff_multiplier: settings.backoff_multiplier.max(1.0),
            add_jitter: settings.add_jitter,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Builder: set max attempts
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder: set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Builder: set max delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Builder: enable/disable jitter
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before retry number `retry` (1-indexed): 2s, 4s, 8s... by default
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let clamped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.add_jitter {
            clamped + clamped * 0.25 * fastrand::f64()
        } else {
            clamped
        };

        Duration::from_secs_f64(delay)
    }
}

/// Retry state tracker
#[derive(Debug)]
pub struct RetryState {
    config: RetryConfig,
    attempts: usize,
    last_error: Option<String>,
}

impl RetryState {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            last_error: None,
        }
    }

    /// Whether another attempt is allowed
    pub fn should_retry(&self) -> bool {
        self.attempts < self.config.max_attempts
    }

    /// Record a failed attempt
    pub fn record_attempt(&mut self, error: impl Into<String>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
    }

    /// Delay before the next attempt; a provider hint can only lengthen it
    pub fn next_delay(&self, hint: Option<Duration>) -> Duration {
        let backoff = self.config.delay_for_retry(self.attempts);
        match hint {
            Some(hint) if hint > backoff => hint.min(self.config.max_delay),
            _ => backoff,
        }
    }

    /// Attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn remaining_attempts(&self) -> usize {
        self.config.max_attempts.saturating_sub(self.attempts)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Execute a provider call, re-issuing it on retryable errors
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut state = RetryState::new(config.clone());

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                state.record_attempt(e.to_string());

                if !e.is_retryable() || !state.should_retry() {
                    return Err(e);
                }

                let delay = state.next_delay(e.retry_after());
                warn!(
                    attempt = state.attempts(),
                    remaining = state.remaining_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying provider call"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_delays_are_two_and_four_seconds() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_retry(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::default().with_max_delay(Duration::from_secs(5));
        assert_eq!(config.delay_for_retry(10), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = RetryConfig::default().with_jitter(true);
        let delays: Vec<Duration> = (0..20).map(|_| config.delay_for_retry(1)).collect();
        for delay in &delays {
            assert!(*delay >= Duration::from_secs(2));
            assert!(*delay <= Duration::from_millis(2500));
        }
        assert!(delays.iter().any(|d| *d != delays[0]));
    }

    #[test]
    fn test_retry_state() {
        let mut state = RetryState::new(RetryConfig::default());
        assert!(state.should_retry());
        assert_eq!(state.remaining_attempts(), 3);

        state.record_attempt("error 1");
        state.record_attempt("error 2");
        assert!(state.should_retry());

        state.record_attempt("error 3");
        assert!(!state.should_retry());
        assert_eq!(state.last_error(), Some("error 3"));
    }

    #[test]
    fn test_retry_after_hint_only_lengthens() {
        let mut state = RetryState::new(RetryConfig::default());
        state.record_attempt("throttled");
        assert_eq!(state.next_delay(Some(Duration::from_secs(1))), Duration::from_secs(2));
        assert_eq!(state.next_delay(Some(Duration::from_secs(9))), Duration::from_secs(9));
        assert_eq!(state.next_delay(Some(Duration::from_secs(90))), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventual_success_after_backoff() {
        let attempts = AtomicUsize::new(0);
        let start = tokio::time::Instant::now();

        let result = with_retry(&RetryConfig::default(), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(ProviderError::rate_limited("slow down"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(6) && waited < Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_returns_immediately() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&RetryConfig::default(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::quota_exhausted("insufficient_quota")) }
        })
        .await;

        assert!(result.unwrap_err().is_quota_exhausted());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_last_error() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = with_retry(&RetryConfig::default(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::timeout("read timed out")) }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
