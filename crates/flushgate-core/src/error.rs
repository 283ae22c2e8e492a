//! Error types for Flushgate Core.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Events reported on the engine's error channel.
///
/// None of these stop the batching loop; they are diagnostics only.
#[derive(Error, Debug)]
pub enum BatchError {
    /// A start was attempted while a run was already active.
    #[error("batcher is already running")]
    AlreadyRunning,

    /// The sink returned an error for one batch.
    #[error("sink failed to flush {items} item(s): {source:#}")]
    Sink {
        /// Number of items (or distinct keys) in the failed batch.
        items: usize,
        /// Error returned by the sink.
        source: anyhow::Error,
    },

    /// The sink panicked; the panic was contained at the dispatch boundary.
    #[error("sink panicked while flushing {items} item(s): {message}")]
    SinkPanicked {
        /// Number of items (or distinct keys) in the abandoned batch.
        items: usize,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A bounded flush (close or drain) did not finish in time.
    #[error("flush of {items} item(s) exceeded its {timeout:?} bound")]
    FlushTimeout {
        /// Number of items (or distinct keys) in the abandoned batch.
        items: usize,
        /// The bound that elapsed.
        timeout: Duration,
    },
}

/// Terminal result of a run that did not complete gracefully.
///
/// A run whose producer closed the ingestion channel finishes with `Ok(())`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunError {
    /// The run was cancelled; any partial batch was discarded.
    #[error("batcher run cancelled")]
    Cancelled,

    /// The run was cancelled and the partial batch was drained to the sink.
    #[error("batcher run cancelled after draining pending items")]
    Drained,

    /// Another run was already active; this call started nothing.
    #[error("batcher is already running")]
    AlreadyRunning,

    /// The run's task ended without publishing a result.
    #[error("batcher run aborted")]
    Aborted,
}

impl RunError {
    /// Returns `true` for both plain and drained cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Drained)
    }

    /// Returns `true` if a drain flush was performed before terminating.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained)
    }
}

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Io {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration document is malformed.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
