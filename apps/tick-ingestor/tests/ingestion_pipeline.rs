//! Ingestion Pipeline Integration Tests
//!
//! Normalize-then-upsert through the public API against the in-memory
//! store: drop accounting, fixed row shape, idempotence and last-write-wins.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use common::{
    NIFTY_50, RELIANCE, RecordingNotifier, at, catalog, equity_tick, index_tick, unknown_tick,
};
use tick_ingestor::{
    BatchProcessor, BatchRetryPolicy, InMemoryTickStore, TickStore, WriteError, normalize,
};

fn processor(
    store: &Arc<InMemoryTickStore>,
    notifier: &Arc<RecordingNotifier>,
    retry: BatchRetryPolicy,
) -> BatchProcessor {
    BatchProcessor::new(catalog(), Arc::clone(store) as _, Arc::clone(notifier) as _, retry)
}

#[tokio::test]
async fn mixed_batch_persists_known_instruments() {
    let store = Arc::new(InMemoryTickStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = processor(&store, &notifier, BatchRetryPolicy::none());

    let report = processor
        .process(&[index_tick(0, 2_245_010), equity_tick(0, 295_050), unknown_tick(0)])
        .await;

    assert_eq!(report.received, 3);
    assert_eq!(report.written, 2);
    assert_eq!(report.unknown_instrument, 1);
    assert_eq!(report.malformed, 0);
    assert_eq!(store.len(), 2);
    assert!(notifier.subjects().is_empty());

    let index = store.get(i64::from(NIFTY_50), at(0)).unwrap();
    assert_eq!(index.tradingsymbol, "NIFTY 50");
    assert!(index.depth_is_null());
    assert!(index.open.is_none());
    assert!(index.volume.is_none());

    let equity = store.get(i64::from(RELIANCE), at(0)).unwrap();
    assert_eq!(equity.price, Decimal::new(295_050, 2));
    assert_eq!(equity.open, Some(Decimal::new(293_000, 2)));
    assert_eq!(equity.buy_depth[4].quantity, Some(500));
    assert_eq!(equity.sell_depth[0].price, Some(Decimal::new(295_055, 2)));
    assert_eq!(equity.changeper, Some(Decimal::new(10_445, 3)));
}

#[tokio::test]
async fn replayed_batch_is_idempotent() {
    let store = Arc::new(InMemoryTickStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = processor(&store, &notifier, BatchRetryPolicy::none());
    let batch = [index_tick(0, 2_245_010), equity_tick(0, 295_050)];

    processor.process(&batch).await;
    let first = store.rows();
    processor.process(&batch).await;

    assert_eq!(store.rows(), first);
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn resent_tick_overwrites_previous_values() {
    let store = Arc::new(InMemoryTickStore::new());
    let catalog = catalog();
    let a = normalize(&equity_tick(1, 295_050), &catalog).unwrap();
    let mut b = normalize(&equity_tick(1, 295_100), &catalog).unwrap();
    b.volume = None;
    b.buy_depth[0].orders = None;

    store.write_batch(&[a]).await.unwrap();
    store.write_batch(std::slice::from_ref(&b)).await.unwrap();

    let stored = store.get(i64::from(RELIANCE), at(1)).unwrap();
    assert_eq!(stored, b);
    assert!(stored.volume.is_none());
}

#[tokio::test]
async fn failed_batch_is_lost_and_next_batch_lands() {
    let store = Arc::new(InMemoryTickStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = processor(&store, &notifier, BatchRetryPolicy::none());
    store.fail_next(WriteError::Connection {
        message: "server closed the connection unexpectedly".to_string(),
    });

    let lost = processor
        .process(&[index_tick(0, 2_245_010), equity_tick(0, 295_050)])
        .await;
    assert!(lost.is_lost());
    assert_eq!(lost.failed, 2);
    assert!(store.is_empty());
    assert_eq!(notifier.subjects(), vec!["Tick batch write failed"]);

    let next = processor.process(&[equity_tick(1, 295_100)]).await;
    assert_eq!(next.written, 1);
    assert_eq!(store.len(), 1);
    assert!(store.get(i64::from(RELIANCE), at(0)).is_none());
}

#[tokio::test]
async fn bounded_retry_recovers_transient_failure() {
    let store = Arc::new(InMemoryTickStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let processor = processor(
        &store,
        &notifier,
        BatchRetryPolicy::bounded(1, Duration::from_millis(1)),
    );
    store.fail_next(WriteError::Query {
        message: "deadlock detected".to_string(),
    });

    let report = processor.process(&[equity_tick(0, 295_050)]).await;

    assert_eq!(report.written, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(store.write_attempts(), 2);
    assert!(notifier.subjects().is_empty());
}
