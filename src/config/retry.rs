//! Retry policy configuration.

use chrono::Duration;
use serde::Deserialize;

/// Caller-initiated retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    /// Maximum number of retry attempts per order (cancelled attempts do
    /// not count).
    pub max_attempts: u32,
    /// Minimum quiet period after a failed attempt before the next retry.
    pub cooldown_secs: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown_secs: 30,
        }
    }
}

impl RetryPolicyConfig {
    /// Cooldown as a chrono duration, for timestamp arithmetic.
    pub fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetryPolicyConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.cooldown(), Duration::seconds(30));
    }
}
