//! Engine configuration.
//!
//! Every tunable of the capture pipeline lives here with its default; the CLI
//! loads the same structure from a JSON file.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SNAPSHOT_LENGTH: usize = 65536;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_PAGES_PER_FLOW: usize = 500;
pub const DEFAULT_PAGES_TOTAL: usize = 100_000;
pub const DEFAULT_MAX_UNWRAP_DEPTH: usize = 5;
pub const DEFAULT_MAX_DECOMPRESSED_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}

/// What happens to the capture side when a predicate fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateErrorPolicy {
    /// Cancel the whole engine: capture stops and every channel closes.
    #[default]
    StopCapture,
    /// Only the dispatcher stops; capture keeps running until closed.
    KeepCapturing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Nested gzip layers unwrapped before the buffer is tagged as-is.
    pub max_unwrap_depth: usize,
    /// Decompressed output allowed for one classified buffer, all layers together.
    pub max_decompressed_bytes: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_unwrap_depth: DEFAULT_MAX_UNWRAP_DEPTH,
            max_decompressed_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub snapshot_length: usize,
    pub read_timeout_ms: u64,
    pub queue_capacity: usize,
    pub dispatch_interval_ms: u64,
    pub dispatch_burst: usize,
    pub flush_interval_ms: u64,
    pub flow_idle_timeout_ms: u64,
    pub max_buffered_pages_per_flow: usize,
    pub max_buffered_pages_total: usize,
    pub classifier: ClassifierConfig,
    pub on_predicate_error: PredicateErrorPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_length: DEFAULT_SNAPSHOT_LENGTH,
            read_timeout_ms: 250,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dispatch_interval_ms: 1000,
            dispatch_burst: 1000,
            flush_interval_ms: 1000,
            flow_idle_timeout_ms: 5000,
            max_buffered_pages_per_flow: DEFAULT_PAGES_PER_FLOW,
            max_buffered_pages_total: DEFAULT_PAGES_TOTAL,
            classifier: ClassifierConfig::default(),
            on_predicate_error: PredicateErrorPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(&'static str, u64); 10] = [
            ("snapshot_length", self.snapshot_length as u64),
            ("read_timeout_ms", self.read_timeout_ms),
            ("queue_capacity", self.queue_capacity as u64),
            ("dispatch_interval_ms", self.dispatch_interval_ms),
            ("dispatch_burst", self.dispatch_burst as u64),
            ("flush_interval_ms", self.flush_interval_ms),
            ("flow_idle_timeout_ms", self.flow_idle_timeout_ms),
            ("max_buffered_pages_per_flow", self.max_buffered_pages_per_flow as u64),
            ("max_buffered_pages_total", self.max_buffered_pages_total as u64),
            (
                "classifier.max_decompressed_bytes",
                self.classifier.max_decompressed_bytes as u64,
            ),
        ];
        match checks.iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero { field: *field }),
            None => Ok(()),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn flow_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.flow_idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.flow_idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.classifier.max_unwrap_depth, 5);
        assert_eq!(config.on_predicate_error, PredicateErrorPolicy::StopCapture);
    }

    #[test]
    fn rejects_zero_capacity() {
        let config = EngineConfig {
            queue_capacity: 0,
            ..EngineConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero {
                field: "queue_capacity"
            })
        );
    }

    #[test]
    fn zero_unwrap_depth_is_allowed() {
        let mut config = EngineConfig::default();
        config.classifier.max_unwrap_depth = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"flow_idle_timeout_ms": 200, "classifier": {"max_unwrap_depth": 2},
                "on_predicate_error": "keep_capturing"}"#,
        )
        .unwrap();
        assert_eq!(config.flow_idle_timeout_ms, 200);
        assert_eq!(config.classifier.max_unwrap_depth, 2);
        assert_eq!(
            config.classifier.max_decompressed_bytes,
            DEFAULT_MAX_DECOMPRESSED_BYTES
        );
        assert_eq!(config.on_predicate_error, PredicateErrorPolicy::KeepCapturing);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }
}
