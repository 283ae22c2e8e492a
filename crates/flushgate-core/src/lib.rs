//! Flushgate Core - concurrent batching engine.
//!
//! Producers push items into a bounded channel; a single event loop groups
//! them into batches and hands each batch to a [`Sink`] when it reaches the
//! flush size, when the stream goes idle for the flush interval, when the
//! producer closes the channel, or (optionally) when the run is cancelled.
//!
//! This crate provides:
//! - The [`Batcher`] engine with ordered and deduplicating strategies
//! - Synchronous or bounded-concurrency asynchronous dispatch
//! - Cancel/drain semantics and a `start`/`run`/`Done` lifecycle
//! - A lazily-sized, drop-on-saturation error channel
//! - Serde-backed configuration and metrics hooks
//!
//! # Example
//!
//! ```rust,no_run
//! use flushgate_core::{BatchConfig, Batcher, FlushContext, sink_fn};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = BatchConfig::new().with_flush_size(500);
//!     let (batcher, tx) = Batcher::ordered(
//!         config,
//!         sink_fn(|_ctx: FlushContext, rows: Vec<String>| async move {
//!             println!("writing {} rows", rows.len());
//!             Ok(())
//!         }),
//!     );
//!
//!     let (done, _errors) = batcher.start(CancellationToken::new());
//!     for i in 0..1_000 {
//!         let _ = tx.send(format!("row-{i}")).await;
//!     }
//!     drop(tx);
//!     let _ = done.wait().await;
//! }
//! ```

pub mod config;
mod engine;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod reporting;
pub mod strategy;
pub mod telemetry;

pub use config::{BatchConfig, DispatchMode};
pub use engine::{Batcher, BatcherBuilder};
pub use error::{BatchError, ConfigError, Result, RunError};
pub use lifecycle::{Done, RunResult};
pub use metrics::{FlushMetrics, FlushStats, FlushStatsSnapshot, NoopMetrics};
pub use reporting::{DEFAULT_ERROR_BUFFER, ErrorChannel, ErrorReceiver};
pub use strategy::{Deduplicating, Ordered, Strategy};

pub use flushgate_abstraction::{FlushContext, Keyed, Sink, SinkResult, sink_fn};
