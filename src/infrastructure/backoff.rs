//! Exponential backoff with bounded random jitter.

use std::time::Duration;

use crate::infrastructure::config::FetcherConfig;

/// Delay before retry `n` (n >= 1) is `base * factor^(n-1)` plus a uniform
/// jitter in `[0, jitter_ratio * that delay]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    #[must_use]
    pub fn from_config(config: &FetcherConfig) -> Self {
        Self {
            max_attempts: config.max_retries,
            base_delay: config.base_delay(),
            factor: config.backoff_factor,
            jitter_ratio: config.jitter_ratio,
        }
    }

    #[must_use]
    pub const fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay without jitter; saturates at `Duration::MAX` instead of overflowing.
    #[must_use]
    pub fn nominal_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        scale(self.base_delay, self.factor.powi(exponent))
    }

    #[must_use]
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let nominal = self.nominal_delay(retry);
        if self.jitter_ratio.is_nan() || self.jitter_ratio <= 0.0 {
            return nominal;
        }
        nominal.saturating_add(scale(nominal, fastrand::f64() * self.jitter_ratio))
    }
}

/// `delay * factor`, saturating; a NaN or negative factor yields no delay.
fn scale(delay: Duration, factor: f64) -> Duration {
    if factor.is_nan() || factor <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}
