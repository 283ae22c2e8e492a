//! Shared test utilities for Flushgate Core integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flushgate_core::{FlushContext, Sink, SinkResult};
use tokio::time::{self, Instant};

/// Installs a test subscriber once per test binary.
pub fn init_tracing() {
    let _ = flushgate_core::telemetry::init_tracing("flushgate_core=debug,warn");
}

/// Sink that records every batch it receives and tracks how many flushes
/// run at the same time.
pub struct Recorder<B> {
    batches: Arc<Mutex<Vec<B>>>,
    latency: Duration,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl<B> Clone for Recorder<B> {
    fn clone(&self) -> Self {
        Self {
            batches: Arc::clone(&self.batches),
            latency: self.latency,
            active: Arc::clone(&self.active),
            peak: Arc::clone(&self.peak),
        }
    }
}

impl<B: Clone> Recorder<B> {
    /// Creates a recorder that returns immediately.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Creates a recorder that sleeps for `latency` inside every flush.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
            latency,
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Copies of the batches received so far, in completion order.
    pub fn batches(&self) -> Vec<B> {
        self.batches.lock().unwrap().clone()
    }

    /// Number of completed flushes.
    pub fn count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    /// Highest number of flushes observed in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Polls until at least `n` batches were recorded or `limit` elapses.
    pub async fn wait_for(&self, n: usize, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        while Instant::now() < deadline {
            if self.count() >= n {
                return true;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        self.count() >= n
    }
}

#[async_trait]
impl<B> Sink<B> for Recorder<B>
where
    B: Send + 'static,
{
    async fn flush(&self, _ctx: FlushContext, batch: B) -> SinkResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            time::sleep(self.latency).await;
        }
        self.batches.lock().unwrap().push(batch);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sends `items` one by one, panicking if the channel is closed.
pub async fn send_all<T>(tx: &tokio::sync::mpsc::Sender<T>, items: impl IntoIterator<Item = T>) {
    for item in items {
        assert!(tx.send(item).await.is_ok(), "ingestion channel closed early");
    }
}
