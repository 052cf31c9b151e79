//! Reconnect delay schedule

use std::time::Duration;

use crate::types::ReconnectPolicy;

/// Exponential backoff driven by a [`ReconnectPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempts: u32,
    current: Duration,
}

impl Backoff {
    /// Start a fresh schedule
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        let current = policy.initial_delay.min(policy.max_delay);
        Self {
            policy,
            attempts: 0,
            current,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    ///
    /// `elapsed` is the time since the connection was lost. Delays never
    /// decrease and never exceed `max_delay`.
    pub fn next_delay(&mut self, elapsed: Duration) -> Option<Duration> {
        if self.exhausted(elapsed) {
            return None;
        }
        let delay = self.current;
        self.attempts += 1;
        let grown = self.current.as_secs_f64() * self.policy.multiplier.max(1.0);
        self.current = Duration::try_from_secs_f64(grown)
            .unwrap_or(self.policy.max_delay)
            .max(self.current)
            .min(self.policy.max_delay);
        Some(delay)
    }

    /// Whether the attempt or time budget is spent
    #[must_use]
    pub fn exhausted(&self, elapsed: Duration) -> bool {
        if !self.policy.enabled {
            return true;
        }
        if self.policy.max_attempts.is_some_and(|max| self.attempts >= max) {
            return true;
        }
        self.policy.max_elapsed.is_some_and(|max| elapsed >= max)
    }

    /// Attempts handed out so far
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current = self.policy.initial_delay.min(self.policy.max_delay);
    }
}
