use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff used by every reconnecting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub multiplier: u32,
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    pub max_delay: Option<Duration>,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based):
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.max(1).saturating_pow(exponent);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX);
        match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// True once `attempts` failed attempts exhaust the policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            max_attempts: 5,
            max_delay: None,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_attempts: config.max_attempts,
            max_delay: config.max_delay_ms.map(Duration::from_millis),
        }
    }
}
