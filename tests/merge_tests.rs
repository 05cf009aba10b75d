// SPDX-License-Identifier: MIT

//! Merger idempotence and batch accounting tests.

mod common;

use cgm_sync::models::Provider;
use cgm_sync::services::{ReadingMerger, MAX_BATCH_SIZE};
use common::{reading, test_store};

#[tokio::test]
async fn merging_same_set_twice_yields_n_rows() {
    let store = test_store().await;
    let merger = ReadingMerger::new(store.clone());

    let readings: Vec<_> = (0..50).map(|i| reading("u1", i * 5, None)).collect();

    let first = merger.merge(&readings).await.unwrap();
    assert_eq!(first.inserted, 50);
    assert_eq!(first.skipped_duplicates, 0);
    assert_eq!(first.failed, 0);

    let second = merger.merge(&readings).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.skipped_duplicates, 50);
    assert_eq!(second.failed, 0);

    assert_eq!(store.count_readings("u1").await.unwrap(), 50);
}

#[tokio::test]
async fn composite_key_dedups_records_without_external_id() {
    let store = test_store().await;
    let merger = ReadingMerger::new(store.clone());

    // Same (user, device_time, source), no external_id on either.
    let a = reading("u1", 0, None);
    let mut b = reading("u1", 0, None);
    b.value_mgdl = 999.0;

    let outcome = merger.merge(&[a, b]).await.unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.skipped_duplicates, 1);
    assert_eq!(store.count_readings("u1").await.unwrap(), 1);
}

#[tokio::test]
async fn external_id_dedups_across_differing_timestamps() {
    let store = test_store().await;
    let merger = ReadingMerger::new(store.clone());

    // Provider re-reports the same record with a slightly different
    // timestamp; the external_id key still collapses them.
    let a = reading("u1", 0, Some("egv-1"));
    let b = reading("u1", 1, Some("egv-1"));

    let outcome = merger.merge(&[a, b]).await.unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.skipped_duplicates, 1);
}

#[tokio::test]
async fn same_time_different_users_do_not_collide() {
    let store = test_store().await;
    let merger = ReadingMerger::new(store.clone());

    let outcome = merger
        .merge(&[reading("u1", 0, None), reading("u2", 0, None)])
        .await
        .unwrap();
    assert_eq!(outcome.inserted, 2);
}

#[tokio::test]
async fn failed_batch_does_not_discard_prior_batches() {
    let store = test_store().await;
    let merger = ReadingMerger::new(store.clone());

    // 1000 readings in two batches of 500; a poison row in batch 2 makes
    // that whole batch fail while batch 1 stays committed.
    let mut readings: Vec<_> = (0..1000).map(|i| reading("u1", i, None)).collect();
    readings[MAX_BATCH_SIZE + 250].value_mgdl = -5.0;

    let outcome = merger.merge(&readings).await.unwrap();
    assert_eq!(outcome.inserted, 500);
    assert_eq!(outcome.failed, 500);
    assert_eq!(outcome.skipped_duplicates, 0);
    assert_eq!(outcome.total(), 1000);

    assert_eq!(store.count_readings("u1").await.unwrap(), 500);

    // Batch 1's rows really are the first 500 minutes.
    let stored = store
        .get_readings("u1", None, 1000)
        .await
        .unwrap();
    assert_eq!(stored.len(), 500);
    assert_eq!(stored[0].device_time, common::base_time());
    assert!(stored.iter().all(|r| r.source == Provider::Dexcom));
}

#[tokio::test]
async fn later_batches_still_run_after_a_failure() {
    let store = test_store().await;
    let merger = ReadingMerger::new(store.clone());

    // Poison in batch 1 of 3; batches 2 and 3 must still commit.
    let mut readings: Vec<_> = (0..1200).map(|i| reading("u1", i, None)).collect();
    readings[10].value_mgdl = f64::NAN;

    let outcome = merger.merge(&readings).await.unwrap();
    assert_eq!(outcome.failed, 500);
    assert_eq!(outcome.inserted, 700);
    assert_eq!(store.count_readings("u1").await.unwrap(), 700);
}
