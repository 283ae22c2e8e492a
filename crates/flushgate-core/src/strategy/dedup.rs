//! Key-deduplicating batches.

use std::collections::HashMap;

use async_trait::async_trait;
use flushgate_abstraction::{FlushContext, Keyed, Sink, SinkResult};

use super::{Strategy, capacity_hint, sealed};

/// Accumulates the most recent item per [`Keyed::key`].
///
/// Fullness counts distinct keys, so a heavily duplicated stream can consume
/// many more raw items than `flush_size` before a size-triggered flush, and
/// a flush may deliver fewer entries than `flush_size`. The idle timer is
/// what guarantees progress for such streams.
#[derive(Debug, Clone)]
pub struct Deduplicating<K> {
    sink: K,
}

impl<K> Deduplicating<K> {
    /// Creates a deduplicating strategy delivering to `sink`.
    pub fn new(sink: K) -> Self {
        Self { sink }
    }

    /// Returns the sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }
}

impl<K> sealed::Sealed for Deduplicating<K> {}

#[async_trait]
impl<T, K> Strategy<T> for Deduplicating<K>
where
    T: Keyed + Send + 'static,
    K: Sink<HashMap<String, T>> + 'static,
{
    type Batch = HashMap<String, T>;

    fn init(&self, flush_size: usize) -> HashMap<String, T> {
        HashMap::with_capacity(capacity_hint(flush_size))
    }

    fn add(&self, batch: &mut HashMap<String, T>, item: T) {
        batch.insert(item.key(), item);
    }

    fn len(&self, batch: &HashMap<String, T>) -> usize {
        batch.len()
    }

    async fn flush(&self, ctx: FlushContext, batch: HashMap<String, T>) -> SinkResult {
        self.sink.flush(ctx, batch).await
    }
}
