//! Flush metrics hooks.
//!
//! The engine reports every flush attempt, every error it forwards and every
//! error it had to drop to an optional [`FlushMetrics`] observer. Exporting
//! those numbers is left to the embedding application; [`FlushStats`] keeps
//! plain in-process counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::BatchError;

/// Observer for flush activity.
///
/// Methods are called from the loop task and from flush tasks, so they must
/// be cheap and must not block.
pub trait FlushMetrics: Send + Sync {
    /// A flush attempt finished (successfully or not).
    fn flush(&self, items: usize, duration: Duration) {
        let _ = (items, duration);
    }

    /// A flush failed; called before the error is offered to the error channel.
    fn error(&self, error: &BatchError) {
        let _ = error;
    }

    /// The error channel was full and an error was discarded.
    fn error_dropped(&self) {}
}

/// Metrics observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl FlushMetrics for NoopMetrics {}

/// Atomic counters for flush activity.
#[derive(Debug, Default)]
pub struct FlushStats {
    flushes: AtomicU64,
    items: AtomicU64,
    errors: AtomicU64,
    dropped_errors: AtomicU64,
    flush_nanos: AtomicU64,
}

/// Point-in-time copy of [`FlushStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStatsSnapshot {
    /// Flush attempts.
    pub flushes: u64,
    /// Items (or distinct keys) handed to the sink.
    pub items: u64,
    /// Flush failures.
    pub errors: u64,
    /// Errors discarded because the error channel was full.
    pub dropped_errors: u64,
    /// Cumulative time spent in the sink.
    pub flush_time: Duration,
}

impl FlushStatsSnapshot {
    /// Average number of entries per flush.
    #[must_use]
    pub fn average_batch_size(&self) -> f64 {
        if self.flushes == 0 {
            return 0.0;
        }
        self.items as f64 / self.flushes as f64
    }
}

impl FlushStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current counter values.
    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            items: self.items.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            dropped_errors: self.dropped_errors.load(Ordering::Relaxed),
            flush_time: Duration::from_nanos(self.flush_nanos.load(Ordering::Relaxed)),
        }
    }
}

impl FlushMetrics for FlushStats {
    fn flush(&self, items: usize, duration: Duration) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.items.fetch_add(items as u64, Ordering::Relaxed);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.flush_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn error(&self, _error: &BatchError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn error_dropped(&self) {
        self.dropped_errors.fetch_add(1, Ordering::Relaxed);
    }
}
