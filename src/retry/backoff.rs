//! Exponential backoff for failed entries

use std::time::Duration;

use rand::Rng;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay unit multiplied by `2^retry_count`
    pub base_delay: Duration,
    /// Upper bound on the exponential part of the delay
    pub max_delay: Duration,
    /// Additive jitter factor (0.0 to 1.0); never shortens the delay
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
        }
    }
}

/// Stateless backoff calculator: the retry count lives with the failed entry.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before an entry that has failed `retry_count` times may be resent.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base = self.config.base_delay.as_secs_f64();
        let max = self.config.max_delay.as_secs_f64();

        let exponential = base * 2f64.powi(retry_count.min(62) as i32);
        let capped = exponential.min(max);

        let final_delay = if self.config.jitter_factor > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.config.jitter_factor;
            capped + rand::rng().random_range(0.0..jitter_range)
        } else {
            capped
        };

        Duration::try_from_secs_f64(final_delay).unwrap_or(Duration::MAX)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
