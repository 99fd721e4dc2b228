//! Deterministic capped exponential backoff for stage retries.
//!
//! Also reused by the client sync machine for reconnect scheduling, so
//! backoff behavior is testable without real wall-clock waits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration for one stage (or one reconnect loop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed beyond the first attempt.
    pub max_retries: u32,
    /// Base delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Cap applied to every computed delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with default delays.
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Total execution attempts allowed (initial attempt plus retries).
    #[must_use]
    pub const fn attempts_allowed(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before the retry following failed attempt `attempt` (0-based):
    /// `base * 2^attempt`, capped.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ms = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}
