//! Engine configuration.

use serde::Deserialize;

use crate::error::EngineResult;

/// Interpreter configuration loaded from environment variables.
///
/// Environment variables are prefixed with `MOP_`:
/// - `MOP_MAX_STEP_VISITS`: times a step id may be entered per run (default: 1)
/// - `MOP_STEP_TIMEOUT_SECS`: per-invocation timeout when a step sets none (default: 300)
/// - `MOP_MAX_PARALLEL_DEVICES`: concurrent invocations per step (default: 32)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Revisit budget per step id
    #[serde(default = "default_max_step_visits")]
    pub max_step_visits: u32,

    /// Default per-invocation timeout in seconds
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Fan-out concurrency bound
    #[serde(default = "default_max_parallel_devices")]
    pub max_parallel_devices: usize,
}

fn default_max_step_visits() -> u32 {
    1
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_max_parallel_devices() -> usize {
    32
}

impl EngineConfig {
    /// Load configuration from `MOP_`-prefixed environment variables.
    pub fn from_env() -> EngineResult<Self> {
        let config = envy::prefixed("MOP_").from_env::<EngineConfig>()?;
        Ok(config.normalized())
    }

    /// Clamp values that would stall a run.
    fn normalized(mut self) -> Self {
        self.max_step_visits = self.max_step_visits.max(1);
        self.max_parallel_devices = self.max_parallel_devices.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_step_visits: default_max_step_visits(),
            step_timeout_secs: default_step_timeout_secs(),
            max_parallel_devices: default_max_parallel_devices(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.max_step_visits, 1);
        assert_eq!(config.step_timeout_secs, 300);
        assert_eq!(config.max_parallel_devices, 32);
    }

    #[test]
    fn test_from_iter() {
        let vars = vec![
            ("MOP_MAX_STEP_VISITS".to_string(), "3".to_string()),
            ("MOP_MAX_PARALLEL_DEVICES".to_string(), "0".to_string()),
        ];
        let config = envy::prefixed("MOP_")
            .from_iter::<_, EngineConfig>(vars)
            .unwrap()
            .normalized();
        assert_eq!(config.max_step_visits, 3);
        assert_eq!(config.step_timeout_secs, 300);
        assert_eq!(config.max_parallel_devices, 1);
    }
}
