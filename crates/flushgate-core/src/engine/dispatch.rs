//! Flush dispatch: panic containment, metrics, error forwarding and the
//! bounded-concurrency spawn path.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use flushgate_abstraction::FlushContext;
use futures::FutureExt;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

use super::Shared;
use crate::config::DispatchMode;
use crate::error::BatchError;
use crate::strategy::Strategy;

impl<T, S> Shared<T, S>
where
    T: Send + 'static,
    S: Strategy<T>,
{
    /// Hands a ready batch to the sink.
    ///
    /// In async mode the batch moves to a tracked task. With a concurrency
    /// limit the permit is acquired before spawning, so a saturated sink
    /// blocks the loop instead of dropping the batch.
    pub(crate) async fn dispatch(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        batch: S::Batch,
        flights: &TaskTracker,
    ) {
        let ctx = FlushContext::new(cancel.clone());
        if self.config.dispatch == DispatchMode::Sync {
            self.execute_flush(ctx, batch).await;
            return;
        }

        let permit = match &self.flush_permits {
            Some(permits) => match Arc::clone(permits).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    error!("Flush semaphore closed, flushing on the loop task");
                    self.execute_flush(ctx, batch).await;
                    return;
                }
            },
            None => None,
        };

        let shared = Arc::clone(self);
        flights.spawn(async move {
            let _permit = permit;
            shared.execute_flush(ctx, batch).await;
        });
    }

    /// Flushes on the current task, recovering panics and reporting the
    /// outcome.
    pub(crate) async fn execute_flush(&self, ctx: FlushContext, batch: S::Batch) {
        let items = self.strategy.len(&batch);
        let started = Instant::now();
        let outcome = AssertUnwindSafe(async { self.strategy.flush(ctx, batch).await })
            .catch_unwind()
            .await;
        let elapsed = started.elapsed();
        self.metrics.flush(items, elapsed);

        match outcome {
            Ok(Ok(())) => {
                debug!(
                    items,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Batch flushed"
                );
            }
            Ok(Err(source)) => {
                warn!(items, error = %source, "Sink failed to flush batch");
                self.report(BatchError::Sink { items, source });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(items, panic = %message, "Sink panicked, batch abandoned");
                self.report(BatchError::SinkPanicked { items, message });
            }
        }
    }

    /// Flushes on the current task, abandoning the batch if `bound` elapses.
    pub(crate) async fn execute_bounded_flush(
        &self,
        ctx: FlushContext,
        batch: S::Batch,
        bound: Option<Duration>,
    ) {
        let Some(limit) = bound else {
            self.execute_flush(ctx, batch).await;
            return;
        };

        let items = self.strategy.len(&batch);
        let bounded = time::timeout(limit, self.execute_flush(ctx, batch)).await;
        if bounded.is_err() {
            self.metrics.flush(items, limit);
            warn!(
                items,
                timeout_ms = limit.as_millis() as u64,
                "Bounded flush timed out, batch abandoned"
            );
            self.report(BatchError::FlushTimeout {
                items,
                timeout: limit,
            });
        }
    }

    /// Forwards an error to the metrics observer and the error channel.
    pub(crate) fn report(&self, error: BatchError) {
        self.metrics.error(&error);
        self.errors.report(error);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
