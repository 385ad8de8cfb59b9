//! Per-provider health tracking
//!
//! A small circuit breaker per provider: consecutive failures open it, a
//! cooldown moves it to half-open, and a success in half-open closes it again.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Breaker state for one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Requests flow normally
    Closed,
    /// Provider is skipped until the cooldown elapses
    Open,
    /// Cooldown elapsed, next outcome decides
    HalfOpen,
}

/// Health tracking configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: usize,
    /// Time an open breaker waits before allowing a trial
    pub cooldown: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl HealthConfig {
    /// Builder: set failure threshold
    pub fn with_failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Builder: set cooldown
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

#[derive(Debug)]
struct Breaker {
    state: HealthState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: HealthState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

impl Breaker {
    fn refresh(&mut self, cooldown: Duration) {
        if self.state == HealthState::Open
            && self.opened_at.is_some_and(|at| at.elapsed() >= cooldown)
        {
            self.state = HealthState::HalfOpen;
        }
    }

    fn open(&mut self) {
        self.state = HealthState::Open;
        self.opened_at = Some(Instant::now());
    }
}

/// Health registry shared by the fallback walker and the pipeline
#[derive(Debug, Default)]
pub struct ProviderHealth {
    config: HealthConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl ProviderHealth {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Breaker>> {
        self.breakers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state, after applying any elapsed cooldown
    pub fn state(&self, provider: &str) -> HealthState {
        let mut breakers = self.lock();
        match breakers.get_mut(provider) {
            Some(breaker) => {
                breaker.refresh(self.config.cooldown);
                breaker.state
            }
            None => HealthState::Closed,
        }
    }

    /// Whether the provider may be selected
    pub fn is_available(&self, provider: &str) -> bool {
        self.state(provider) != HealthState::Open
    }

    pub fn record_success(&self, provider: &str) {
        let mut breakers = self.lock();
        let breaker = breakers.entry(provider.to_string()).or_default();
        if breaker.state != HealthState::Closed {
            info!(provider, "Provider recovered");
        }
        *breaker = Breaker::default();
    }

    pub fn record_failure(&self, provider: &str) {
        let mut breakers = self.lock();
        let breaker = breakers.entry(provider.to_string()).or_default();
        breaker.refresh(self.config.cooldown);

        match breaker.state {
            HealthState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        provider,
                        failures = breaker.consecutive_failures,
                        "Provider marked unhealthy"
                    );
                    breaker.open();
                }
            }
            HealthState::HalfOpen => {
                warn!(provider, "Provider failed trial request");
                breaker.open();
            }
            HealthState::Open => {}
        }
    }

    /// Open the breaker immediately, e.g. on quota exhaustion
    pub fn trip(&self, provider: &str) {
        warn!(provider, "Provider taken out of rotation");
        self.lock().entry(provider.to_string()).or_default().open();
    }

    pub fn reset(&self, provider: &str) {
        self.lock().remove(provider);
    }
}
