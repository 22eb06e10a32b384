//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::ChannelConfig;

/// Delay schedule between channel connect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base_ms: u64,
    max_ms: u64,
}

impl ReconnectBackoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self { base_ms, max_ms }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let capped = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(attempt - 1))
            .min(self.max_ms);

        // Up to 10% jitter on top of the capped delay.
        let jitter_range = capped / 10;
        let jitter = if jitter_range > 0 {
            rand::thread_rng().gen_range(0..jitter_range)
        } else {
            0
        };

        Duration::from_millis(capped + jitter)
    }
}

impl From<&ChannelConfig> for ReconnectBackoff {
    fn from(config: &ChannelConfig) -> Self {
        Self::new(config.backoff_base_ms, config.backoff_max_ms)
    }
}
