//! Engine configuration

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Pool must have at least one worker
    #[error("worker_count must be at least 1")]
    ZeroWorkers,

    /// Watchdog threshold of zero would warn continuously
    #[error("gate_watchdog_ms must be greater than 0 when set")]
    ZeroWatchdog,

    /// Config file could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// VM dispatch engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// Number of parallel workers; also the number of ordering gates
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Warn when an ordering gate wait exceeds this many milliseconds.
    /// The wait itself is never abandoned.
    #[serde(default)]
    pub gate_watchdog_ms: Option<u64>,
    /// Prefix for worker thread names
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_worker_count() -> usize {
    4
}

fn default_thread_name_prefix() -> String {
    "bach-vm-worker".to_string()
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            gate_watchdog_ms: None,
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl VmConfig {
    /// Default configuration with the given worker count
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    /// Set the gate watchdog threshold
    pub fn with_gate_watchdog(mut self, threshold: Duration) -> Self {
        self.gate_watchdog_ms = Some(threshold.as_millis() as u64);
        self
    }

    /// Validate and return the worker count
    pub fn validate(&self) -> Result<NonZeroUsize, ConfigError> {
        if self.gate_watchdog_ms == Some(0) {
            return Err(ConfigError::ZeroWatchdog);
        }
        NonZeroUsize::new(self.worker_count).ok_or(ConfigError::ZeroWorkers)
    }

    /// Gate watchdog threshold, if enabled
    pub fn gate_watchdog(&self) -> Option<Duration> {
        self.gate_watchdog_ms.map(Duration::from_millis)
    }

    /// Parse from a JSON string
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::info!("Loading VM config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.gate_watchdog(), None);
        assert_eq!(config.thread_name_prefix, "bach-vm-worker");
        assert_eq!(config.validate().unwrap().get(), 4);
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = VmConfig::from_json_str("{}").unwrap();
        assert_eq!(config, VmConfig::default());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = VmConfig::from_json_str(r#"{"worker_count": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWorkers));
        assert!(VmConfig::with_workers(0).validate().is_err());
    }

    #[test]
    fn test_zero_watchdog_rejected() {
        let err = VmConfig::from_json_str(r#"{"gate_watchdog_ms": 0}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroWatchdog));
    }

    #[test]
    fn test_with_gate_watchdog() {
        let config = VmConfig::with_workers(2).with_gate_watchdog(Duration::from_millis(250));
        assert_eq!(config.gate_watchdog(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_invalid_json() {
        let err = VmConfig::from_json_str("{worker_count").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"worker_count": 8, "gate_watchdog_ms": 500}"#)
            .unwrap();

        let config = VmConfig::load(file.path()).unwrap();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.gate_watchdog(), Some(Duration::from_millis(500)));
        assert_eq!(config.thread_name_prefix, "bach-vm-worker");
    }

    #[test]
    fn test_load_missing_file() {
        let err = VmConfig::load(Path::new("/nonexistent/bach-vm.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
