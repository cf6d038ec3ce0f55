//! Reconciler configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classify::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Tunables for retry budget, polling and the stop/start bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Retries available to transient and throttled errors per reconciliation.
    pub retry_budget: u32,
    /// Delay before retrying a transient error, or a throttled error without hint.
    pub retry_delay_secs: u64,
    /// Delay between stabilization checks.
    pub poll_delay_secs: u64,
    /// In-process sleep while the server is STARTING or STOPPING.
    pub transition_sleep_secs: u64,
    pub max_stop_start_cycles: u32,
    /// Skips the in-process transition sleep.
    pub test_mode: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry_budget: 5,
            retry_delay_secs: 15,
            poll_delay_secs: 5,
            transition_sleep_secs: 10,
            max_stop_start_cycles: 3,
            test_mode: false,
        }
    }
}

impl ReconcilerConfig {
    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }

    pub fn poll_delay(&self) -> Duration {
        Duration::from_secs(self.poll_delay_secs)
    }

    /// Zero in test mode.
    pub fn transition_sleep(&self) -> Duration {
        if self.test_mode {
            Duration::ZERO
        } else {
            Duration::from_secs(self.transition_sleep_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ReconcilerConfig =
            serde_json::from_str(r#"{ "retry_budget": 2, "test_mode": true }"#).unwrap();
        assert_eq!(config.retry_budget, 2);
        assert_eq!(config.retry_delay_secs, 15);
        assert_eq!(config.max_stop_start_cycles, 3);
        assert_eq!(config.transition_sleep(), Duration::ZERO);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = ReconcilerConfig::load(Path::new("/nonexistent/xfer.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
