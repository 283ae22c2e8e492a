//! Error reporting channel.
//!
//! Sink failures, recovered panics and lifecycle notices are diagnostics, not
//! control flow: they are offered to a bounded channel with `try_send` and
//! dropped when nobody keeps up. The channel is created lazily by whichever
//! side needs it first, and that first caller fixes its capacity for the
//! lifetime of the engine.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::error::BatchError;
use crate::metrics::FlushMetrics;

/// Capacity used when the engine materializes the channel itself.
pub const DEFAULT_ERROR_BUFFER: usize = 100;

/// Receiving side of the error channel.
///
/// Clones share one queue: each error is delivered to exactly one receiver.
/// The engine never closes the channel, so [`ErrorReceiver::recv`] waits
/// indefinitely when nothing is reported.
#[derive(Clone)]
pub struct ErrorReceiver {
    inner: Arc<Mutex<mpsc::Receiver<BatchError>>>,
    capacity: usize,
}

impl fmt::Debug for ErrorReceiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReceiver")
            .field("capacity", &self.capacity)
            .field("pending", &self.len())
            .finish()
    }
}

impl ErrorReceiver {
    /// Waits for the next reported error.
    pub async fn recv(&self) -> Option<BatchError> {
        self.inner.lock().await.recv().await
    }

    /// Returns the next error if one is queued, without waiting.
    ///
    /// Also returns `None` while another clone is blocked in `recv`.
    pub fn try_recv(&self) -> Option<BatchError> {
        self.inner.try_lock().ok()?.try_recv().ok()
    }

    /// Takes every queued error without waiting.
    pub fn drain(&self) -> Vec<BatchError> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Number of queued errors (zero while another clone is receiving).
    pub fn len(&self) -> usize {
        self.inner.try_lock().map(|rx| rx.len()).unwrap_or(0)
    }

    /// Returns `true` if no errors are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity fixed when the channel was materialized.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

struct Materialized {
    tx: mpsc::Sender<BatchError>,
    rx: ErrorReceiver,
}

/// Lazily-sized, drop-on-saturation error outlet shared by every run of an
/// engine.
pub struct ErrorChannel {
    slot: OnceLock<Materialized>,
    metrics: Arc<dyn FlushMetrics>,
}

impl fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorChannel")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl ErrorChannel {
    /// Creates an unmaterialized channel reporting drops to `metrics`.
    pub fn new(metrics: Arc<dyn FlushMetrics>) -> Self {
        Self {
            slot: OnceLock::new(),
            metrics,
        }
    }

    /// Materializes the channel with `capacity` if nothing has sized it yet.
    ///
    /// Later capacities are ignored; zero selects [`DEFAULT_ERROR_BUFFER`].
    pub fn ensure(&self, capacity: usize) {
        self.materialize(capacity);
    }

    /// Returns a receiver, materializing the channel with `capacity` if this
    /// is the first request. Later capacities are ignored; zero selects
    /// [`DEFAULT_ERROR_BUFFER`].
    pub fn receiver(&self, capacity: usize) -> ErrorReceiver {
        self.materialize(capacity).rx.clone()
    }

    /// Capacity of the channel, or `None` if it was never materialized.
    pub fn capacity(&self) -> Option<usize> {
        self.slot.get().map(|slot| slot.rx.capacity)
    }

    /// Offers an error to the channel without blocking.
    ///
    /// Returns `false` if the error was dropped because the channel is full.
    pub fn report(&self, error: BatchError) -> bool {
        let slot = self.materialize(DEFAULT_ERROR_BUFFER);
        match slot.tx.try_send(error) {
            Ok(()) => true,
            Err(TrySendError::Full(error) | TrySendError::Closed(error)) => {
                self.metrics.error_dropped();
                warn!(
                    error = %error,
                    capacity = slot.rx.capacity,
                    "Error channel saturated, dropping error"
                );
                false
            }
        }
    }

    fn materialize(&self, capacity: usize) -> &Materialized {
        self.slot.get_or_init(|| {
            let capacity = if capacity == 0 {
                DEFAULT_ERROR_BUFFER
            } else {
                capacity
            };
            let (tx, rx) = mpsc::channel(capacity);
            let rx = ErrorReceiver {
                inner: Arc::new(Mutex::new(rx)),
                capacity,
            };
            Materialized { tx, rx }
        })
    }
}
