//! Order-preserving batches.

use async_trait::async_trait;
use flushgate_abstraction::{FlushContext, Sink, SinkResult};

use super::{Strategy, capacity_hint, sealed};

/// Accumulates items in a `Vec` in arrival order.
///
/// A batch is full when it holds `flush_size` items.
#[derive(Debug, Clone)]
pub struct Ordered<K> {
    sink: K,
}

impl<K> Ordered<K> {
    /// Creates an ordered strategy delivering to `sink`.
    pub fn new(sink: K) -> Self {
        Self { sink }
    }

    /// Returns the sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }
}

impl<K> sealed::Sealed for Ordered<K> {}

#[async_trait]
impl<T, K> Strategy<T> for Ordered<K>
where
    T: Send + 'static,
    K: Sink<Vec<T>> + 'static,
{
    type Batch = Vec<T>;

    fn init(&self, flush_size: usize) -> Vec<T> {
        Vec::with_capacity(capacity_hint(flush_size))
    }

    fn add(&self, batch: &mut Vec<T>, item: T) {
        batch.push(item);
    }

    fn len(&self, batch: &Vec<T>) -> usize {
        batch.len()
    }

    async fn flush(&self, ctx: FlushContext, batch: Vec<T>) -> SinkResult {
        self.sink.flush(ctx, batch).await
    }
}
