//! Run lifecycle: launching the loop and observing its completion.
//!
//! An engine is either Idle or Running. [`Batcher::start`] spawns the loop on
//! the runtime, [`Batcher::run`] and [`Batcher::perform`] drive it on the
//! calling task. Every successful launch creates a fresh [`Done`] handle that
//! resolves once the run has fully stopped.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::engine::{Batcher, RunGuard, Shared};
use crate::error::{BatchError, RunError};
use crate::reporting::{DEFAULT_ERROR_BUFFER, ErrorReceiver};
use crate::strategy::Strategy;

/// Terminal value of a run. `Ok(())` means the producer closed the channel.
pub type RunResult = Result<(), RunError>;

/// Completion signal of a single run.
///
/// Clones observe the same run. The signal resolves exactly once, after the
/// final or drain flush and after every asynchronous flush of the run has
/// returned.
#[derive(Clone)]
pub struct Done {
    rx: watch::Receiver<Option<RunResult>>,
    run_id: u64,
}

impl fmt::Debug for Done {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Done")
            .field("run_id", &self.run_id)
            .field("result", &self.result())
            .finish()
    }
}

impl Done {
    /// A signal that is already resolved.
    pub(crate) fn resolved(result: RunResult, run_id: u64) -> Self {
        let (_tx, rx) = watch::channel(Some(result));
        Self { rx, run_id }
    }

    /// Waits for the run to stop and returns its result.
    pub async fn wait(&self) -> RunResult {
        let mut rx = self.rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(published) => {
                let result = *published;
                result.unwrap_or(Err(RunError::Aborted))
            }
            Err(_) => Err(RunError::Aborted),
        }
    }

    /// Returns `true` once the run has stopped.
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Result of the run, if it has stopped.
    pub fn result(&self) -> Option<RunResult> {
        *self.rx.borrow()
    }

    /// Sequence number of the run, starting at 1 for the engine's first run.
    pub fn run_id(&self) -> u64 {
        self.run_id
    }
}

enum Launch {
    Started {
        guard: RunGuard,
        done: Done,
        run_id: u64,
    },
    Busy(Done),
}

impl<T, S> Shared<T, S>
where
    T: Send + 'static,
    S: Strategy<T>,
{
    /// Moves the engine from Idle to Running and registers a new [`Done`].
    ///
    /// The compare-and-swap happens under the `current_run` lock so a
    /// concurrent caller observing Running also observes the new handle.
    fn launch(&self) -> Launch {
        let mut current = self
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let claimed = self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if !claimed {
            let existing = current
                .clone()
                .unwrap_or_else(|| Done::resolved(Err(RunError::AlreadyRunning), 0));
            return Launch::Busy(existing);
        }

        let run_id = self.run_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(None);
        let done = Done { rx, run_id };
        *current = Some(done.clone());
        Launch::Started {
            guard: RunGuard::new(Arc::clone(&self.running), tx),
            done,
            run_id,
        }
    }

    fn reject_launch(&self, existing: &Done) {
        warn!(
            active_run = existing.run_id(),
            "Batcher is already running, launch rejected"
        );
        self.report(BatchError::AlreadyRunning);
    }
}

impl<T, S> Batcher<T, S>
where
    T: Send + 'static,
    S: Strategy<T>,
{
    /// Spawns the loop and returns its completion signal together with the
    /// error channel.
    ///
    /// If a run is already active, nothing is spawned: the active run's
    /// signal is returned unchanged and [`BatchError::AlreadyRunning`] is
    /// reported on the error channel.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self, cancel: CancellationToken) -> (Done, ErrorReceiver) {
        let errors = self.inner.errors.receiver(DEFAULT_ERROR_BUFFER);
        match self.inner.launch() {
            Launch::Busy(existing) => {
                self.inner.reject_launch(&existing);
                (existing, errors)
            }
            Launch::Started {
                guard,
                done,
                run_id,
            } => {
                let shared = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    let _ = shared.execute_run(cancel, guard, run_id).await;
                });
                (done, errors)
            }
        }
    }

    /// Sizes the error channel, then runs the loop on the calling task.
    ///
    /// `error_buffer` only applies if the channel has not been materialized
    /// yet; zero selects the default.
    pub async fn run(&self, cancel: CancellationToken, error_buffer: usize) -> RunResult {
        self.inner.errors.ensure(error_buffer);
        self.perform(cancel).await
    }

    /// Runs the loop on the calling task until the producer closes the
    /// channel or `cancel` fires.
    ///
    /// Returns [`RunError::AlreadyRunning`] immediately, without touching the
    /// active run, if another run is in progress.
    pub async fn perform(&self, cancel: CancellationToken) -> RunResult {
        match self.inner.launch() {
            Launch::Busy(existing) => {
                self.inner.reject_launch(&existing);
                Err(RunError::AlreadyRunning)
            }
            Launch::Started { guard, run_id, .. } => {
                self.inner.execute_run(cancel, guard, run_id).await
            }
        }
    }

    /// Completion signal of the latest run, or `None` if none was launched.
    pub fn done(&self) -> Option<Done> {
        self.inner
            .current_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
