//! Token-budget rate limiting for outbound provider calls.

use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Rough token estimate: words × 1.3, rounded up
pub fn estimate_tokens(text: &str) -> u64 {
    let words = text.split_whitespace().count() as u64;
    (words * 13).div_ceil(10)
}

/// Token estimate for a whole batch
pub fn estimate_batch_tokens<S: AsRef<str>>(texts: &[S]) -> u64 {
    texts.iter().map(|t| estimate_tokens(t.as_ref())).sum()
}

struct Window {
    started: Instant,
    used: u64,
}

/// Gate that paces operations by estimated token cost.
///
/// Budget is charged on admission. A request larger than the whole window
/// budget is admitted alone at the start of a fresh window.
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<Window>,
    semaphore: Semaphore,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            window: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
            semaphore: Semaphore::new(config.max_concurrent.max(1)),
            config,
        }
    }

    /// Run `operation` once `estimated_tokens` fit in the current window.
    ///
    /// The concurrency permit is released when `operation` completes,
    /// whatever its outcome.
    pub async fn with_budget<F, Fut, T>(&self, estimated_tokens: u64, operation: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.semaphore.acquire().await.ok();
        self.admit(estimated_tokens).await;
        operation().await
    }

    async fn admit(&self, tokens: u64) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let elapsed = window.started.elapsed();
                if elapsed >= self.config.window {
                    window.started = Instant::now();
                    window.used = 0;
                }

                if window.used == 0 || window.used + tokens <= self.config.tokens_per_window {
                    window.used += tokens;
                    return;
                }

                self.config.window.saturating_sub(window.started.elapsed())
            };

            debug!(
                tokens,
                wait_ms = wait.as_millis() as u64,
                "Token budget exhausted, waiting for next window"
            );
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Tokens left in the current window
    pub async fn remaining(&self) -> u64 {
        let window = self.window.lock().await;
        if window.started.elapsed() >= self.config.window {
            return self.config.tokens_per_window;
        }
        self.config.tokens_per_window.saturating_sub(window.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(tokens: u64, window_secs: u64, max_concurrent: usize) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            tokens_per_window: tokens,
            window: Duration::from_secs(window_secs),
            max_concurrent,
        })
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one"), 2);
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
        assert_eq!(estimate_batch_tokens(&["a b", "c"]), 3 + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_next_window() {
        let limiter = limiter(100, 60, 2);
        let start = Instant::now();

        limiter.with_budget(80, || async {}).await;
        assert_eq!(limiter.remaining().await, 20);

        limiter.with_budget(50, || async {}).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert_eq!(limiter.remaining().await, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_admitted_in_fresh_window() {
        let limiter = limiter(100, 60, 1);
        let start = Instant::now();
        let value = limiter.with_budget(500, || async { 7 }).await;
        assert_eq!(value, 7);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_permit_released_after_failure() {
        let limiter = limiter(1_000, 60, 1);
        let failed: Result<(), &str> = limiter.with_budget(1, || async { Err("boom") }).await;
        assert!(failed.is_err());

        let ok: Result<u8, &str> = limiter.with_budget(1, || async { Ok(1) }).await;
        assert_eq!(ok, Ok(1));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let limiter = Arc::new(limiter(1_000_000, 60, 2));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let active = active.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    limiter
                        .with_budget(10, || async {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.remaining().await, 1_000_000 - 80);
    }
}
