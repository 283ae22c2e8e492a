//! The batching engine.
//!
//! A [`Batcher`] owns the receiving end of a bounded ingestion channel and
//! runs a single event loop over it: items are accumulated by the configured
//! [`Strategy`], and a batch is dispatched when it becomes full, when the idle
//! timer fires, when the producer closes the channel, or (optionally) when the
//! run is cancelled.
//!
//! ```text
//! producers ──> mpsc (buffer_size) ──> event loop ──> Strategy::add
//!                                           │
//!                     full / idle / close / drain
//!                                           │
//!                               dispatch (sync | async ≤ K)
//!                                           │
//!                               Strategy::flush ──> Sink
//!                                           │
//!                               FlushMetrics / ErrorChannel
//! ```
//!
//! Flush size and interval can be changed while a run is active; the loop
//! re-reads them on every iteration and an interval change wakes it so the
//! timer is re-armed immediately.

mod dispatch;
mod run;

pub(crate) use run::RunGuard;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flushgate_abstraction::{Keyed, Sink};
use tokio::sync::{Notify, Semaphore, mpsc};

use crate::config::{BatchConfig, DEFAULT_FLUSH_INTERVAL, DEFAULT_FLUSH_SIZE};
use crate::lifecycle::Done;
use crate::metrics::{FlushMetrics, NoopMetrics};
use crate::reporting::{ErrorChannel, ErrorReceiver};
use crate::strategy::{Deduplicating, Ordered, Strategy};

/// Flush size and interval as currently in effect.
///
/// Plain atomics read once per loop iteration; updates never take a lock.
pub(crate) struct LiveSettings {
    flush_size: AtomicUsize,
    flush_interval_nanos: AtomicU64,
    /// Single-permit wake-up raised when the interval changes.
    pub(crate) nudge: Notify,
}

impl LiveSettings {
    fn new(config: &BatchConfig) -> Self {
        Self {
            flush_size: AtomicUsize::new(config.flush_size),
            flush_interval_nanos: AtomicU64::new(duration_nanos(config.flush_interval)),
            nudge: Notify::new(),
        }
    }

    pub(crate) fn flush_size(&self) -> usize {
        self.flush_size.load(Ordering::Relaxed)
    }

    pub(crate) fn flush_interval(&self) -> Duration {
        Duration::from_nanos(self.flush_interval_nanos.load(Ordering::Relaxed))
    }

    fn set_flush_size(&self, flush_size: usize) -> usize {
        let flush_size = if flush_size == 0 {
            DEFAULT_FLUSH_SIZE
        } else {
            flush_size
        };
        self.flush_size.store(flush_size, Ordering::Relaxed);
        flush_size
    }

    fn set_flush_interval(&self, interval: Duration) -> Duration {
        let interval = if interval.is_zero() {
            DEFAULT_FLUSH_INTERVAL
        } else {
            interval
        };
        self.flush_interval_nanos
            .store(duration_nanos(interval), Ordering::Relaxed);
        self.nudge.notify_one();
        interval
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// State shared by the handle, the event loop and flush tasks.
pub(crate) struct Shared<T, S> {
    /// Normalized configuration.
    pub(crate) config: BatchConfig,
    pub(crate) strategy: S,
    /// Ingestion buffer; locked by the active run for its whole duration.
    pub(crate) input: tokio::sync::Mutex<mpsc::Receiver<T>>,
    /// Idle/Running flag, flipped with compare-and-swap.
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) live: LiveSettings,
    pub(crate) errors: ErrorChannel,
    pub(crate) metrics: Arc<dyn FlushMetrics>,
    /// Caps in-flight asynchronous flushes; `None` when unbounded.
    pub(crate) flush_permits: Option<Arc<Semaphore>>,
    /// Completion signal of the latest run.
    pub(crate) current_run: Mutex<Option<Done>>,
    pub(crate) run_counter: AtomicU64,
}

/// Handle to a batching engine.
///
/// Cheap to clone; every clone controls the same engine. At most one run is
/// active at a time, see [`Batcher::start`], [`Batcher::run`] and
/// [`Batcher::perform`].
pub struct Batcher<T, S> {
    pub(crate) inner: Arc<Shared<T, S>>,
}

impl<T, S> Clone for Batcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S> fmt::Debug for Batcher<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("config", &self.inner.config)
            .field("running", &self.inner.running.load(Ordering::Relaxed))
            .field("flush_size", &self.inner.live.flush_size())
            .field("flush_interval", &self.inner.live.flush_interval())
            .finish_non_exhaustive()
    }
}

/// Builder for a [`Batcher`].
pub struct BatcherBuilder<S> {
    strategy: S,
    config: BatchConfig,
    metrics: Option<Arc<dyn FlushMetrics>>,
}

impl<S> fmt::Debug for BatcherBuilder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatcherBuilder")
            .field("config", &self.config)
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl<S> BatcherBuilder<S> {
    /// Starts a builder around a strategy with the default configuration.
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            config: BatchConfig::default(),
            metrics: None,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Installs a metrics observer.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<dyn FlushMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the engine and returns it with the producer side of its
    /// ingestion channel.
    ///
    /// Dropping every clone of the sender closes the channel; the active run
    /// then flushes what it holds and completes successfully.
    pub fn build<T>(self) -> (Batcher<T, S>, mpsc::Sender<T>)
    where
        T: Send + 'static,
        S: Strategy<T>,
    {
        let config = self.config.normalized();
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(NoopMetrics));
        let (tx, rx) = mpsc::channel(config.buffer_size);
        let flush_permits = config
            .flush_concurrency_limit()
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let shared = Shared {
            live: LiveSettings::new(&config),
            errors: ErrorChannel::new(Arc::clone(&metrics)),
            strategy: self.strategy,
            input: tokio::sync::Mutex::new(rx),
            running: Arc::new(AtomicBool::new(false)),
            metrics,
            flush_permits,
            current_run: Mutex::new(None),
            run_counter: AtomicU64::new(0),
            config,
        };
        let batcher = Batcher {
            inner: Arc::new(shared),
        };
        (batcher, tx)
    }
}

impl<T, S> Batcher<T, S>
where
    T: Send + 'static,
    S: Strategy<T>,
{
    /// Creates an engine from a configuration and a strategy.
    pub fn new(config: BatchConfig, strategy: S) -> (Self, mpsc::Sender<T>) {
        BatcherBuilder::new(strategy).config(config).build()
    }

    /// Returns the normalized configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Returns `true` while a run is active.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Returns a receiver for the error channel.
    ///
    /// The first request (this one, or the engine's own first report) fixes
    /// the channel capacity; later capacities are ignored.
    pub fn error_channel(&self, capacity: usize) -> ErrorReceiver {
        self.inner.errors.receiver(capacity)
    }

    /// Flush size currently in effect.
    pub fn flush_size(&self) -> usize {
        self.inner.live.flush_size()
    }

    /// Changes the flush size of the active and future runs.
    ///
    /// Zero selects the default. Returns the value applied.
    pub fn set_flush_size(&self, flush_size: usize) -> usize {
        self.inner.live.set_flush_size(flush_size)
    }

    /// Idle-flush interval currently in effect.
    pub fn flush_interval(&self) -> Duration {
        self.inner.live.flush_interval()
    }

    /// Changes the idle-flush interval and re-arms the running timer.
    ///
    /// Zero selects the default. Returns the value applied.
    pub fn set_flush_interval(&self, interval: Duration) -> Duration {
        self.inner.live.set_flush_interval(interval)
    }
}

impl<T, K> Batcher<T, Ordered<K>>
where
    T: Send + 'static,
    K: Sink<Vec<T>> + 'static,
{
    /// Creates an engine delivering `Vec<T>` batches in arrival order.
    pub fn ordered(config: BatchConfig, sink: K) -> (Self, mpsc::Sender<T>) {
        Self::new(config, Ordered::new(sink))
    }
}

impl<T, K> Batcher<T, Deduplicating<K>>
where
    T: Keyed + Send + 'static,
    K: Sink<std::collections::HashMap<String, T>> + 'static,
{
    /// Creates an engine delivering the latest item per key.
    pub fn deduplicating(config: BatchConfig, sink: K) -> (Self, mpsc::Sender<T>) {
        Self::new(config, Deduplicating::new(sink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_BUFFER_SIZE;
    use flushgate_abstraction::{FlushContext, sink_fn};

    fn noop_batcher(
        config: BatchConfig,
    ) -> (Batcher<u32, Ordered<impl Sink<Vec<u32>>>>, mpsc::Sender<u32>) {
        let sink = sink_fn(|_ctx: FlushContext, _batch: Vec<u32>| async { Ok(()) });
        Batcher::ordered(config, sink)
    }

    #[test]
    fn test_new_normalizes_config() {
        let config = BatchConfig::new().with_buffer_size(0).with_flush_size(0);
        let (batcher, tx) = noop_batcher(config);
        assert_eq!(batcher.config().buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(tx.max_capacity(), DEFAULT_BUFFER_SIZE);
        assert_eq!(batcher.flush_size(), DEFAULT_FLUSH_SIZE);
        assert!(!batcher.is_running());
    }

    #[test]
    fn test_live_settings_fall_back_on_zero() {
        let (batcher, _tx) = noop_batcher(BatchConfig::new().with_flush_size(4));
        assert_eq!(batcher.set_flush_size(16), 16);
        assert_eq!(batcher.flush_size(), 16);
        assert_eq!(batcher.set_flush_size(0), DEFAULT_FLUSH_SIZE);

        let interval = Duration::from_secs(3);
        assert_eq!(batcher.set_flush_interval(interval), interval);
        assert_eq!(batcher.flush_interval(), interval);
        assert_eq!(
            batcher.set_flush_interval(Duration::ZERO),
            DEFAULT_FLUSH_INTERVAL
        );

        // Live values never rewrite the construction-time configuration.
        assert_eq!(batcher.config().flush_size, 4);
    }

    #[test]
    fn test_async_limit_creates_semaphore() {
        let (bounded, _tx) = noop_batcher(BatchConfig::new().with_async_dispatch(3));
        let permits = bounded
            .inner
            .flush_permits
            .as_ref()
            .map(|s| s.available_permits());
        assert_eq!(permits, Some(3));

        let (unbounded, _tx) = noop_batcher(BatchConfig::new().with_async_dispatch(0));
        assert!(unbounded.inner.flush_permits.is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let (batcher, _tx) = noop_batcher(BatchConfig::default());
        let clone = batcher.clone();
        clone.set_flush_size(7);
        assert_eq!(batcher.flush_size(), 7);
        assert!(format!("{batcher:?}").contains("flush_size: 7"));
    }
}
