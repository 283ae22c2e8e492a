//! Sink abstraction layer for Flushgate.
//!
//! This crate defines the traits and types a batching pipeline hands its
//! batches to: the [`Sink`] trait, the [`FlushContext`] every flush receives,
//! and the [`Keyed`] trait used by the deduplicating container.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result type returned by sinks.
///
/// Sink failures are opaque to the engine, so any error type converts.
pub type SinkResult = anyhow::Result<()>;

/// Execution context passed to every flush.
///
/// Carries the cancellation token of the owning run and, for bounded flushes
/// (final flush on close, drain on cancel), an absolute deadline. Sinks that
/// perform I/O should observe [`FlushContext::done`] so the engine's bounds
/// take effect cooperatively.
#[derive(Clone)]
pub struct FlushContext {
    /// Cancellation token of the run (or of the bounded sub-context).
    cancel: CancellationToken,
    /// Optional absolute deadline.
    deadline: Option<Instant>,
}

impl fmt::Debug for FlushContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl FlushContext {
    /// Creates an unbounded context tied to the given cancellation token.
    #[must_use]
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// Creates a context that expires `timeout` from now.
    ///
    /// A timeout too large to represent as an instant yields a context
    /// without a deadline.
    #[must_use]
    pub fn with_timeout(cancel: CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Creates a context that expires at an absolute deadline.
    #[must_use]
    pub fn with_deadline(cancel: CancellationToken, deadline: Instant) -> Self {
        Self {
            cancel,
            deadline: Some(deadline),
        }
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the time left before the deadline, if any.
    ///
    /// A deadline in the past yields `Some(Duration::ZERO)`.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cancel.is_cancelled() || self.remaining().is_some_and(|left| left.is_zero())
    }

    /// Returns `true` if the owning token was cancelled.
    ///
    /// Deadline expiry is not cancellation; use [`FlushContext::is_done`]
    /// to check both.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Returns the underlying cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// A destination for flushed batches.
///
/// `B` is the batch shape: `Vec<T>` for ordered batching,
/// `HashMap<String, T>` for deduplicated batching. Implementations must be
/// safe to call concurrently with themselves when the engine is configured
/// for more than one in-flight flush.
#[async_trait]
pub trait Sink<B>: Send + Sync
where
    B: Send + 'static,
{
    /// Delivers one batch.
    ///
    /// # Errors
    /// Any error is reported on the engine's error channel; it never stops
    /// the batching loop.
    async fn flush(&self, ctx: FlushContext, batch: B) -> SinkResult;
}

#[async_trait]
impl<B, S> Sink<B> for Arc<S>
where
    B: Send + 'static,
    S: Sink<B> + ?Sized,
{
    async fn flush(&self, ctx: FlushContext, batch: B) -> SinkResult {
        (**self).flush(ctx, batch).await
    }
}

/// A [`Sink`] backed by an async closure. Built with [`sink_fn`].
#[derive(Clone)]
pub struct SinkFn<F> {
    f: F,
}

impl<F> fmt::Debug for SinkFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkFn").finish_non_exhaustive()
    }
}

/// Wraps an async closure as a [`Sink`].
///
/// ```rust
/// use flushgate_abstraction::{sink_fn, FlushContext};
///
/// let sink = sink_fn(|_ctx: FlushContext, batch: Vec<u32>| async move {
///     println!("writing {} rows", batch.len());
///     Ok(())
/// });
/// # let _ = sink;
/// ```
pub fn sink_fn<B, F, Fut>(f: F) -> SinkFn<F>
where
    F: Fn(FlushContext, B) -> Fut + Send + Sync,
    Fut: Future<Output = SinkResult> + Send,
{
    SinkFn { f }
}

#[async_trait]
impl<B, F, Fut> Sink<B> for SinkFn<F>
where
    B: Send + 'static,
    F: Fn(FlushContext, B) -> Fut + Send + Sync,
    Fut: Future<Output = SinkResult> + Send,
{
    async fn flush(&self, ctx: FlushContext, batch: B) -> SinkResult {
        (self.f)(ctx, batch).await
    }
}

/// Items that can be deduplicated by a stable string key.
///
/// Two items with the same key are considered the same logical record; the
/// later one replaces the earlier one inside a batch.
pub trait Keyed {
    /// Returns the deduplication key.
    fn key(&self) -> String;
}

impl Keyed for String {
    fn key(&self) -> String {
        self.clone()
    }
}

impl Keyed for &'static str {
    fn key(&self) -> String {
        (*self).to_string()
    }
}

impl<V> Keyed for (String, V) {
    fn key(&self) -> String {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_sink_fn_receives_batch() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let sink = sink_fn(move |_ctx: FlushContext, batch: Vec<u32>| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.fetch_add(batch.len(), Ordering::SeqCst);
                Ok(())
            }
        });

        let ctx = FlushContext::new(CancellationToken::new());
        sink.flush(ctx, vec![1, 2, 3]).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_arc_sink_delegates() {
        let sink: Arc<dyn Sink<Vec<u8>>> =
            Arc::new(sink_fn(|_ctx: FlushContext, _batch: Vec<u8>| async {
                Err(anyhow::anyhow!("downstream unavailable"))
            }));

        let err = sink
            .flush(FlushContext::new(CancellationToken::new()), vec![1])
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "downstream unavailable");
    }

    #[tokio::test]
    async fn test_context_without_deadline() {
        let ctx = FlushContext::new(CancellationToken::new());
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_deadline_expires() {
        let timeout = Duration::from_millis(50);
        let ctx = FlushContext::with_timeout(CancellationToken::new(), timeout);
        assert!(!ctx.is_done());
        assert!(ctx.remaining().unwrap() <= timeout);

        ctx.done().await;
        assert!(ctx.is_done());
        assert!(!ctx.is_cancelled());
        assert_eq!(ctx.remaining(), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_oversized_timeout_has_no_deadline() {
        let ctx = FlushContext::with_timeout(CancellationToken::new(), Duration::MAX);
        assert!(ctx.deadline().is_none());
        assert!(ctx.remaining().is_none());
        assert!(!ctx.is_done());
    }

    #[tokio::test]
    async fn test_context_cancellation_completes_done() {
        let token = CancellationToken::new();
        let ctx = FlushContext::new(token.clone());

        let mut done = tokio_test::task::spawn(async move { ctx.done().await });
        tokio_test::assert_pending!(done.poll());

        token.cancel();
        assert!(done.is_woken());
        tokio_test::assert_ready!(done.poll());
    }

    #[test]
    fn test_keyed_impls() {
        assert_eq!("user-1".key(), "user-1");
        assert_eq!(String::from("user-2").key(), "user-2");
        assert_eq!(("user-3".to_string(), 42).key(), "user-3");
    }
}
