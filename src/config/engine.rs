//! Engine configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Saga engine knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default per-step deadline in seconds.
    pub step_timeout_secs: u64,
    /// Per-step deadline overrides, keyed by step name.
    pub step_timeout_overrides: HashMap<String, u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: 30,
            step_timeout_overrides: HashMap::new(),
        }
    }
}

impl EngineConfig {
    /// Deadline for one step, honoring the per-step override.
    pub fn step_timeout(&self, step_name: &str) -> Duration {
        let secs = self
            .step_timeout_overrides
            .get(step_name)
            .copied()
            .unwrap_or(self.step_timeout_secs);
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout_is_thirty_seconds() {
        let config = EngineConfig::default();
        assert_eq!(config.step_timeout("any"), Duration::from_secs(30));
    }

    #[test]
    fn test_override_wins_for_named_step() {
        let mut config = EngineConfig::default();
        config
            .step_timeout_overrides
            .insert("Payment Processing".to_string(), 5);

        assert_eq!(
            config.step_timeout("Payment Processing"),
            Duration::from_secs(5)
        );
        assert_eq!(config.step_timeout("other"), Duration::from_secs(30));
    }
}
