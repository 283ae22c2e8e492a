//! The event loop of a single run.

use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use flushgate_abstraction::FlushContext;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::Shared;
use crate::error::RunError;
use crate::lifecycle::RunResult;
use crate::strategy::Strategy;

/// Deadline used when the interval is too large to add to `now`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Marks a run as active; returns the engine to Idle and publishes the run's
/// result when dropped, even if the loop unwinds.
pub(crate) struct RunGuard {
    running: Arc<AtomicBool>,
    done: watch::Sender<Option<RunResult>>,
    result: RunResult,
}

impl RunGuard {
    pub(crate) fn new(running: Arc<AtomicBool>, done: watch::Sender<Option<RunResult>>) -> Self {
        Self {
            running,
            done,
            result: Err(RunError::Aborted),
        }
    }

    /// Records the terminal result and terminates the run.
    pub(crate) fn finish(mut self, result: RunResult) {
        self.result = result;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.done.send_replace(Some(self.result));
    }
}

fn deadline_after(interval: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(interval)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

impl<T, S> Shared<T, S>
where
    T: Send + 'static,
    S: Strategy<T>,
{
    /// Runs the loop to completion and terminates the run.
    pub(crate) async fn execute_run(
        self: &Arc<Self>,
        cancel: CancellationToken,
        guard: RunGuard,
        run_id: u64,
    ) -> RunResult {
        info!(
            run_id,
            flush_size = self.live.flush_size(),
            flush_interval_ms = self.live.flush_interval().as_millis() as u64,
            dispatch = ?self.config.dispatch,
            "Batcher run started"
        );

        let mut input = self.input.lock().await;
        let flights = TaskTracker::new();
        let result = self.event_loop(&cancel, &mut input, &flights).await;
        drop(input);

        flights.close();
        if !flights.is_empty() {
            debug!(
                run_id,
                in_flight = flights.len(),
                "Waiting for in-flight flushes"
            );
        }
        flights.wait().await;

        match result {
            Ok(()) => info!(run_id, "Batcher run completed, producer closed"),
            Err(reason) => info!(run_id, reason = %reason, "Batcher run stopped"),
        }
        guard.finish(result);
        result
    }

    async fn event_loop(
        self: &Arc<Self>,
        cancel: &CancellationToken,
        input: &mut mpsc::Receiver<T>,
        flights: &TaskTracker,
    ) -> RunResult {
        let mut batch = self.strategy.init(self.live.flush_size());
        let timer = time::sleep_until(deadline_after(self.live.flush_interval()));
        tokio::pin!(timer);

        loop {
            let flush_size = self.live.flush_size();

            // Cancellation first so it is observed on every iteration; the
            // timer before input so a saturated producer cannot starve idle
            // flushes.
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    return self.on_cancel(input, batch).await;
                }
                () = &mut timer => {
                    if !self.strategy.is_empty(&batch) {
                        let ready = mem::replace(&mut batch, self.strategy.init(flush_size));
                        debug!(
                            items = self.strategy.len(&ready),
                            "Idle interval elapsed, flushing"
                        );
                        self.dispatch(cancel, ready, flights).await;
                    }
                    self.rearm(timer.as_mut());
                }
                () = self.live.nudge.notified() => {
                    debug!(
                        flush_interval_ms = self.live.flush_interval().as_millis() as u64,
                        "Flush interval changed, re-arming timer"
                    );
                    self.rearm(timer.as_mut());
                }
                received = input.recv() => {
                    let Some(item) = received else {
                        self.on_close(cancel, batch).await;
                        return Ok(());
                    };
                    self.strategy.add(&mut batch, item);
                    if self.strategy.is_full(&batch, flush_size) {
                        let full = mem::replace(&mut batch, self.strategy.init(flush_size));
                        self.dispatch(cancel, full, flights).await;
                        self.rearm(timer.as_mut());
                    }
                }
            }
        }
    }

    /// Restarts the idle timer from now with the current interval.
    ///
    /// Resetting the deadline also discards a fire that elapsed but was never
    /// observed, so a tick racing a size-triggered flush cannot produce an
    /// immediate extra flush.
    fn rearm(&self, timer: Pin<&mut Sleep>) {
        timer.reset(deadline_after(self.live.flush_interval()));
    }

    /// Producer closed the channel: one final synchronous flush.
    async fn on_close(&self, cancel: &CancellationToken, batch: S::Batch) {
        if self.strategy.is_empty(&batch) {
            return;
        }
        let bound = self.config.final_flush_bound();
        debug!(
            items = self.strategy.len(&batch),
            timeout_ms = bound.map(|b| b.as_millis() as u64),
            "Ingestion closed, performing final flush"
        );
        let ctx = match bound {
            Some(limit) => FlushContext::with_timeout(cancel.child_token(), limit),
            None => FlushContext::new(cancel.child_token()),
        };
        self.execute_bounded_flush(ctx, batch, bound).await;
    }

    /// Run cancelled: discard, or drain what is already buffered and flush it
    /// once within the grace period.
    async fn on_cancel(&self, input: &mut mpsc::Receiver<T>, mut batch: S::Batch) -> RunResult {
        if !self.config.drain_on_cancel {
            if !self.strategy.is_empty(&batch) {
                debug!(
                    discarded = self.strategy.len(&batch),
                    "Run cancelled, discarding partial batch"
                );
            }
            return Err(RunError::Cancelled);
        }

        let mut pulled = 0usize;
        while let Ok(item) = input.try_recv() {
            self.strategy.add(&mut batch, item);
            pulled += 1;
        }

        let grace = self.config.drain_grace_period;
        debug!(
            pulled,
            items = self.strategy.len(&batch),
            grace_ms = grace.as_millis() as u64,
            "Run cancelled, draining"
        );
        if !self.strategy.is_empty(&batch) {
            // The run's token is already cancelled; the drain gets its own.
            let ctx = FlushContext::with_timeout(CancellationToken::new(), grace);
            self.execute_bounded_flush(ctx, batch, Some(grace)).await;
        }
        Err(RunError::Drained)
    }
}
