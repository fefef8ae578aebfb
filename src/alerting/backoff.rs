//! Retry policy for sink deliveries.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with symmetric jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: u32,
    /// Fraction of the delay added or removed at random, e.g. `0.25`.
    pub jitter: f64,
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            jitter: 0.25,
            max_attempts: 3,
            cap: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `retry` (1-based).
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(31);
        let multiplier = self.factor.max(1).saturating_pow(exp);
        self.base.saturating_mul(multiplier).min(self.cap)
    }

    /// Delay before retry number `retry`, jittered and capped.
    pub fn delay(&self, retry: u32) -> Duration {
        let spread = self.jitter.clamp(0.0, 1.0);
        let unit = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        self.delay_with(retry, unit)
    }

    /// `delay` with an explicit jitter offset in `[-jitter, jitter]`.
    pub fn delay_with(&self, retry: u32, offset: f64) -> Duration {
        let nominal = self.nominal_delay(retry).as_secs_f64();
        let jittered = (nominal * (1.0 + offset)).max(0.0);
        Duration::from_secs_f64(jittered).min(self.cap)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
