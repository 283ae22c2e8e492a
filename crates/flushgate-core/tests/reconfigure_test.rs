//! Changing flush size and interval while a run is active.

mod common;

use std::time::Duration;

use common::{Recorder, init_tracing, send_all};
use flushgate_core::{BatchConfig, Batcher, RunError};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_interval_change_rearms_running_timer() {
    init_tracing();
    let sink = Recorder::<Vec<u32>>::new();
    let config = BatchConfig::new()
        .with_flush_size(100)
        .with_flush_interval(Duration::from_secs(60));
    let (batcher, tx) = Batcher::ordered(config, sink.clone());

    let cancel = CancellationToken::new();
    let (done, _errors) = batcher.start(cancel.clone());
    send_all(&tx, [1, 2]).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sink.count(), 0);

    let applied = batcher.set_flush_interval(Duration::from_millis(30));
    assert_eq!(applied, Duration::from_millis(30));
    assert!(sink.wait_for(1, Duration::from_secs(2)).await);
    assert_eq!(sink.batches(), vec![vec![1, 2]]);

    cancel.cancel();
    assert_eq!(done.wait().await, Err(RunError::Cancelled));
}

#[tokio::test]
async fn test_lowered_flush_size_applies_to_current_batch() {
    init_tracing();
    let sink = Recorder::<Vec<u32>>::new();
    let config = BatchConfig::new()
        .with_flush_size(100)
        .with_flush_interval(Duration::from_secs(60));
    let (batcher, tx) = Batcher::ordered(config, sink.clone());

    let cancel = CancellationToken::new();
    let (done, _errors) = batcher.start(cancel.clone());
    send_all(&tx, 0..5).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(sink.count(), 0);

    batcher.set_flush_size(2);
    send_all(&tx, [5]).await;
    assert!(sink.wait_for(1, Duration::from_secs(2)).await);
    assert_eq!(sink.batches(), vec![(0..6).collect::<Vec<_>>()]);

    send_all(&tx, [6, 7]).await;
    assert!(sink.wait_for(2, Duration::from_secs(2)).await);
    assert_eq!(sink.batches()[1], vec![6, 7]);

    cancel.cancel();
    let _ = done.wait().await;
}

#[tokio::test]
async fn test_settings_persist_across_runs() {
    init_tracing();
    let sink = Recorder::<Vec<u32>>::new();
    let config = BatchConfig::new()
        .with_flush_size(100)
        .with_flush_interval(Duration::from_secs(60));
    let (batcher, tx) = Batcher::ordered(config, sink.clone());

    batcher.set_flush_size(3);
    let applied = batcher.set_flush_interval(Duration::ZERO);
    assert_eq!(applied, Duration::from_millis(100));

    send_all(&tx, 0..7).await;
    drop(tx);
    assert_eq!(batcher.run(CancellationToken::new(), 0).await, Ok(()));

    let sizes: Vec<usize> = sink.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
    assert_eq!(batcher.config().flush_size, 100);
    assert_eq!(batcher.flush_interval(), Duration::from_millis(100));
}
