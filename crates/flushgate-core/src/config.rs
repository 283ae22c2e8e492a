//! Configuration for the batching engine.
//!
//! Durations are expressed in milliseconds on the wire so the same record can
//! be loaded from TOML or JSON:
//!
//! ```toml
//! buffer_size = 1000
//! flush_size = 250
//! flush_interval_ms = 50
//! drain_on_cancel = true
//! drain_grace_period_ms = 200
//! max_concurrent_flushes = 4
//! dispatch = "async"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Ingestion buffer capacity used when `buffer_size` is zero.
pub const DEFAULT_BUFFER_SIZE: usize = 100;
/// Fullness threshold used when `flush_size` is zero.
pub const DEFAULT_FLUSH_SIZE: usize = 100;
/// Idle-flush period used when `flush_interval` is zero.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
/// Drain-on-cancel bound used when `drain_grace_period` is zero.
pub const DEFAULT_DRAIN_GRACE_PERIOD: Duration = Duration::from_millis(100);

/// How the engine hands a ready batch to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Await the sink on the loop task. Flushes execute in order.
    #[default]
    Sync,
    /// Spawn each flush on its own task, bounded by `max_concurrent_flushes`.
    Async,
}

/// Engine configuration, fixed at construction.
///
/// Zero values are never rejected; [`BatchConfig::normalized`] replaces them
/// with the defaults documented on each field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Capacity of the ingestion channel. Default: 100.
    pub buffer_size: usize,
    /// Number of items (or distinct keys) that makes a batch full. Default: 100.
    pub flush_size: usize,
    /// Idle period after which a non-empty batch is flushed. Default: 100ms.
    #[serde(rename = "flush_interval_ms", with = "duration_ms")]
    pub flush_interval: Duration,
    /// Flush the partial batch (and anything still buffered) on cancellation.
    pub drain_on_cancel: bool,
    /// Bound on the drain-on-cancel flush. Default: 100ms.
    #[serde(rename = "drain_grace_period_ms", with = "duration_ms")]
    pub drain_grace_period: Duration,
    /// Bound on the final flush after the producer closes. Zero means unbounded.
    #[serde(rename = "final_flush_timeout_ms", with = "duration_ms")]
    pub final_flush_timeout: Duration,
    /// Cap on in-flight asynchronous flushes. Zero means unbounded.
    pub max_concurrent_flushes: usize,
    /// Synchronous or asynchronous dispatch.
    pub dispatch: DispatchMode,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            flush_size: DEFAULT_FLUSH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            drain_on_cancel: false,
            drain_grace_period: DEFAULT_DRAIN_GRACE_PERIOD,
            final_flush_timeout: Duration::ZERO,
            max_concurrent_flushes: 0,
            dispatch: DispatchMode::Sync,
        }
    }
}

impl BatchConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from a TOML document.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] if the document is not valid TOML or
    /// does not match the schema.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Parse`] if its contents are invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Returns a copy with every zero value replaced by its default.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            buffer_size: or_default(self.buffer_size, DEFAULT_BUFFER_SIZE),
            flush_size: or_default(self.flush_size, DEFAULT_FLUSH_SIZE),
            flush_interval: or_default_duration(self.flush_interval, DEFAULT_FLUSH_INTERVAL),
            drain_on_cancel: self.drain_on_cancel,
            drain_grace_period: or_default_duration(
                self.drain_grace_period,
                DEFAULT_DRAIN_GRACE_PERIOD,
            ),
            final_flush_timeout: self.final_flush_timeout,
            max_concurrent_flushes: self.max_concurrent_flushes,
            dispatch: self.dispatch,
        }
    }

    /// Bound on the close-path final flush, or `None` when unbounded.
    #[must_use]
    pub fn final_flush_bound(&self) -> Option<Duration> {
        (!self.final_flush_timeout.is_zero()).then_some(self.final_flush_timeout)
    }

    /// Cap on in-flight asynchronous flushes, or `None` when unbounded.
    #[must_use]
    pub fn flush_concurrency_limit(&self) -> Option<usize> {
        (self.max_concurrent_flushes > 0).then_some(self.max_concurrent_flushes)
    }

    /// Sets the ingestion buffer capacity.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Sets the fullness threshold.
    #[must_use]
    pub fn with_flush_size(mut self, flush_size: usize) -> Self {
        self.flush_size = flush_size;
        self
    }

    /// Sets the idle-flush period.
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Enables drain-on-cancel with the given grace period.
    #[must_use]
    pub fn with_drain_on_cancel(mut self, grace_period: Duration) -> Self {
        self.drain_on_cancel = true;
        self.drain_grace_period = grace_period;
        self
    }

    /// Bounds the final flush performed when the producer closes.
    #[must_use]
    pub fn with_final_flush_timeout(mut self, timeout: Duration) -> Self {
        self.final_flush_timeout = timeout;
        self
    }

    /// Switches to asynchronous dispatch with at most `max_concurrent` flushes
    /// in flight (zero for unbounded).
    #[must_use]
    pub fn with_async_dispatch(mut self, max_concurrent: usize) -> Self {
        self.dispatch = DispatchMode::Async;
        self.max_concurrent_flushes = max_concurrent;
        self
    }
}

fn or_default(value: usize, default: usize) -> usize {
    if value == 0 { default } else { value }
}

fn or_default_duration(value: Duration, default: Duration) -> Duration {
    if value.is_zero() { default } else { value }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = BatchConfig::default();
        assert_eq!(config.buffer_size, 100);
        assert_eq!(config.flush_size, 100);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert!(!config.drain_on_cancel);
        assert_eq!(config.dispatch, DispatchMode::Sync);
        assert_eq!(config.final_flush_bound(), None);
        assert_eq!(config.flush_concurrency_limit(), None);
    }

    #[test]
    fn test_normalized_replaces_zero_values() {
        let config = BatchConfig {
            buffer_size: 0,
            flush_size: 0,
            flush_interval: Duration::ZERO,
            drain_on_cancel: true,
            drain_grace_period: Duration::ZERO,
            final_flush_timeout: Duration::ZERO,
            max_concurrent_flushes: 0,
            dispatch: DispatchMode::Async,
        }
        .normalized();

        assert_eq!(config.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.flush_size, DEFAULT_FLUSH_SIZE);
        assert_eq!(config.flush_interval, DEFAULT_FLUSH_INTERVAL);
        assert_eq!(config.drain_grace_period, DEFAULT_DRAIN_GRACE_PERIOD);
        assert!(config.drain_on_cancel);
        assert_eq!(config.dispatch, DispatchMode::Async);
        assert_eq!(config.final_flush_bound(), None);
    }

    #[test]
    fn test_normalized_keeps_explicit_values() {
        let config = BatchConfig::new()
            .with_buffer_size(8)
            .with_flush_size(4)
            .with_flush_interval(Duration::from_secs(2))
            .with_final_flush_timeout(Duration::from_millis(500))
            .with_async_dispatch(3)
            .normalized();

        assert_eq!(config.buffer_size, 8);
        assert_eq!(config.flush_size, 4);
        assert_eq!(config.flush_interval, Duration::from_secs(2));
        assert_eq!(config.final_flush_bound(), Some(Duration::from_millis(500)));
        assert_eq!(config.flush_concurrency_limit(), Some(3));
    }

    #[test]
    fn test_config_from_toml() {
        let source = r#"
            buffer_size = 1000
            flush_size = 250
            flush_interval_ms = 50
            drain_on_cancel = true
            drain_grace_period_ms = 200
            max_concurrent_flushes = 4
            dispatch = "async"
        "#;
        let config = BatchConfig::from_toml_str(source).unwrap();
        assert_eq!(config.buffer_size, 1000);
        assert_eq!(config.flush_size, 250);
        assert_eq!(config.flush_interval, Duration::from_millis(50));
        assert!(config.drain_on_cancel);
        assert_eq!(config.drain_grace_period, Duration::from_millis(200));
        assert_eq!(config.final_flush_timeout, Duration::ZERO);
        assert_eq!(config.max_concurrent_flushes, 4);
        assert_eq!(config.dispatch, DispatchMode::Async);
    }

    #[test]
    fn test_config_deserialize_minimal() {
        let config: BatchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, BatchConfig::default());
    }

    #[test]
    fn test_config_json_roundtrip_uses_millis() {
        let config = BatchConfig::new().with_flush_interval(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["flush_interval_ms"], 1500);
        assert_eq!(json["dispatch"], "sync");
    }

    #[test]
    fn test_config_from_toml_invalid() {
        let err = BatchConfig::from_toml_str("flush_size = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid configuration"));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "flush_size = 7").unwrap();
        writeln!(file, "final_flush_timeout_ms = 300").unwrap();

        let config = BatchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.flush_size, 7);
        assert_eq!(config.final_flush_bound(), Some(Duration::from_millis(300)));
    }

    #[test]
    fn test_config_from_missing_file() {
        let err = BatchConfig::from_file("/definitely/not/here/flushgate.toml").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => {
                assert!(path.ends_with("flushgate.toml"));
            }
            other => panic!("Expected Io error, got {other:?}"),
        }
    }
}
