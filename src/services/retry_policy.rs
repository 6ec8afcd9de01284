//! Retry delay computation for failed attempts.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use std::time::Duration;

use crate::domain::models::RetryConfig;

/// Deterministic exponential backoff between attempts.
///
/// The delay before retry `n` (1-based) is `initial * multiplier^(n-1)`,
/// capped at `max`. A zero initial delay requeues immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    initial: Duration,
    max: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    pub const fn new(initial: Duration, max: Duration, multiplier: f64) -> Self {
        Self {
            initial,
            max,
            multiplier,
        }
    }

    /// Requeue failed tasks without delay.
    pub const fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Delay before the retry that follows `failed_attempts` failures.
    pub fn delay_for(&self, failed_attempts: u32) -> Duration {
        if self.initial.is_zero() || failed_attempts == 0 {
            return Duration::ZERO;
        }

        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial)
            .with_randomization_factor(0.0)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max.max(self.initial))
            .with_max_elapsed_time(None)
            .build();

        let mut delay = self.initial;
        for _ in 0..failed_attempts {
            delay = backoff.next_backoff().unwrap_or(delay);
        }
        delay
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.multiplier,
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}
