//! Batch container strategies.
//!
//! A strategy decides how a batch is started, grown, tested for fullness and
//! handed to its sink. The set is closed: [`Ordered`] keeps arrival order in a
//! `Vec`, [`Deduplicating`] keeps the latest item per key in a `HashMap`.
//! Neither does any synchronization; the engine owns every container
//! exclusively and moves it into the flush.

mod dedup;
mod ordered;

pub use dedup::Deduplicating;
pub use ordered::Ordered;

use async_trait::async_trait;
use flushgate_abstraction::{FlushContext, SinkResult};

/// Upper bound on the capacity pre-allocated for a fresh container.
const MAX_PREALLOCATED: usize = 4096;

/// Capacity to reserve for a container expected to reach `flush_size`.
pub(crate) fn capacity_hint(flush_size: usize) -> usize {
    flush_size.min(MAX_PREALLOCATED)
}

mod sealed {
    pub trait Sealed {}
}

/// Container capabilities the engine relies on.
///
/// This trait is sealed; pick [`Ordered`] or [`Deduplicating`] at
/// construction.
#[async_trait]
pub trait Strategy<T>: sealed::Sealed + Send + Sync + 'static {
    /// The container type, also the shape the sink receives.
    type Batch: Send + 'static;

    /// Creates an empty container sized for `flush_size` entries.
    fn init(&self, flush_size: usize) -> Self::Batch;

    /// Adds one item to the container.
    fn add(&self, batch: &mut Self::Batch, item: T);

    /// Number of entries that count towards fullness.
    fn len(&self, batch: &Self::Batch) -> usize;

    /// Returns `true` if the container holds nothing to flush.
    fn is_empty(&self, batch: &Self::Batch) -> bool {
        self.len(batch) == 0
    }

    /// Returns `true` once the container reached `flush_size` entries.
    fn is_full(&self, batch: &Self::Batch, flush_size: usize) -> bool {
        self.len(batch) >= flush_size
    }

    /// Hands the container to the sink.
    async fn flush(&self, ctx: FlushContext, batch: Self::Batch) -> SinkResult;
}
