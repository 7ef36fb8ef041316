// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate failures and verify graceful degradation.
//!
//! These tests verify the live streams survive unreachable stores, slow
//! remotes, dying change feeds and event storms without panics, hangs or
//! runaway probing.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use common::{seed, Harness};
use replica_monitor::document::Document;
use replica_monitor::replication::{ReplicationDirection, ReplicationEvent};
use replica_monitor::store::StoreError;
use replica_monitor::{MonitorConfig, SnapshotFailurePolicy, SourcePolicy, SyncRatio};
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn config() -> MonitorConfig {
    MonitorConfig::for_testing("http://remote:5984/db")
}

// =============================================================================
// Remote Flapping
// =============================================================================

/// Test: The ratio follows the remote going away and coming back
#[tokio::test(start_paused = true)]
async fn flapping_remote_ratio_recovers() {
    let h = Harness::start().await;
    seed(h.local.as_ref(), "doc", 2).await;
    seed(h.remote.as_ref(), "doc", 2).await;
    h.remote.memory().set_unreachable(true);

    let mut ratios = h.monitor.sync_status().unwrap();
    assert_eq!(ratios.next().await.unwrap(), SyncRatio::PROBE_FAILED);

    h.remote.memory().set_unreachable(false);
    assert_eq!(ratios.next().await.unwrap(), SyncRatio::IN_SYNC);

    h.remote.memory().set_unreachable(true);
    assert_eq!(ratios.next().await.unwrap(), SyncRatio::PROBE_FAILED);
}

/// Test: A slow remote costs one timeout per tick, not a stuck stream
#[tokio::test(start_paused = true)]
async fn slow_remote_then_fast_again() {
    let h = Harness::start().await;
    seed(h.local.as_ref(), "doc", 1).await;
    seed(h.remote.as_ref(), "doc", 2).await;
    h.remote.memory().set_latency(Duration::from_secs(30));

    let mut ratios = h.monitor.sync_status().unwrap();
    assert_eq!(ratios.next().await.unwrap(), SyncRatio::PROBE_FAILED);

    h.remote.memory().set_latency(Duration::ZERO);
    assert_eq!(ratios.next().await.unwrap().value(), 0.5);
}

/// Test: Failed probes repeating the same sentinel are not redelivered
#[tokio::test(start_paused = true)]
async fn unreachable_remote_sentinel_delivered_once() {
    let h = Harness::start().await;
    h.remote.memory().set_unreachable(true);

    let mut ratios = h.monitor.sync_status().unwrap();
    assert_eq!(ratios.next().await.unwrap(), SyncRatio::PROBE_FAILED);
    assert!(timeout(Duration::from_secs(30), ratios.next()).await.is_err());
    assert!(h.local.info_calls() >= 5);
}

// =============================================================================
// Unreachable Local Store
// =============================================================================

/// Test: Keep-last policy holds the previous snapshot through failures
#[tokio::test(start_paused = true)]
async fn unreachable_local_keeps_last_snapshot() {
    let h = Harness::start().await;
    seed(h.local.as_ref(), "doc", 2).await;
    let mut docs = h.monitor.documents().unwrap();
    assert_eq!(docs.next().await.unwrap().unwrap().len(), 2);

    h.local.memory().set_unreachable(true);
    h.replicator
        .arm(ReplicationDirection::Down)
        .emit(ReplicationEvent::Active);
    assert!(timeout(Duration::from_secs(12), docs.next()).await.is_err());

    h.local.memory().set_unreachable(false);
    h.monitor.put(Document::with_id("doc-new")).await.unwrap();
    assert_eq!(docs.next().await.unwrap().unwrap().len(), 3);
}

/// Test: Empty policy delivers an empty snapshot on failure
#[tokio::test(start_paused = true)]
async fn unreachable_local_delivers_empty_snapshot() {
    let mut config = config();
    config.settings.probe.snapshot_failure = SnapshotFailurePolicy::Empty;
    let h = Harness::start_with(config).await;
    seed(h.local.as_ref(), "doc", 2).await;

    let mut docs = h.monitor.documents().unwrap();
    assert_eq!(docs.next().await.unwrap().unwrap().len(), 2);

    h.local.memory().set_unreachable(true);
    h.replicator
        .arm(ReplicationDirection::Up)
        .emit(ReplicationEvent::Paused);
    assert!(docs.next().await.unwrap().unwrap().is_empty());
}

/// Test: Propagate policy ends the stream with the error
#[tokio::test(start_paused = true)]
async fn unreachable_local_propagates_and_ends() {
    let mut config = config();
    config.settings.probe.snapshot_failure = SnapshotFailurePolicy::Propagate;
    let h = Harness::start_with(config).await;
    h.local.memory().set_unreachable(true);

    let mut docs = h.monitor.documents().unwrap();
    assert!(matches!(
        docs.next().await,
        Some(Err(StoreError::Unavailable(_)))
    ));
    assert!(docs.next().await.is_none());
}

/// Test: A hung local store costs one timed-out fetch per tick, never a pile-up
#[tokio::test(start_paused = true)]
async fn hung_local_store_fetches_stay_bounded() {
    let h = Harness::start().await;
    h.local.memory().set_latency(Duration::from_secs(3600));

    let mut docs = h.monitor.documents().unwrap();
    assert!(timeout(Duration::from_secs(120), docs.next()).await.is_err());

    assert!(h.local.list_calls() >= 20);
    assert!(
        h.local.list_in_flight() <= 2,
        "fetches outstanding: {}",
        h.local.list_in_flight()
    );

    h.local.memory().set_latency(Duration::ZERO);
    assert!(docs.next().await.unwrap().unwrap().is_empty());
}

/// Test: An unreachable local store also fails the ratio, and the
/// status log keeps going with the last snapshot
#[tokio::test(start_paused = true)]
async fn unreachable_local_status_log_keeps_documents() {
    let h = Harness::start().await;
    seed(h.local.as_ref(), "doc", 1).await;
    seed(h.remote.as_ref(), "doc", 1).await;
    let mut log = h.monitor.status_log().unwrap();
    let first = log.next().await.unwrap().unwrap();

    h.local.memory().set_unreachable(true);
    let degraded = log.next().await.unwrap().unwrap();

    assert_eq!(degraded.documents(), first.documents());
    assert_eq!(degraded.ratio(), SyncRatio::PROBE_FAILED);
    assert_eq!(degraded.description(), "offline");
}

// =============================================================================
// Dying Change Feed
// =============================================================================

/// Test: A change feed that keeps ending is reopened with backoff
#[tokio::test(start_paused = true)]
async fn ending_change_feed_is_resubscribed() {
    let h = Harness::start().await;
    h.local.set_feed_ends(true);

    let mut docs = h.monitor.documents().unwrap();
    docs.next().await.unwrap().unwrap();
    sleep(Duration::from_secs(1)).await;

    assert!(h.local.feed_opens() >= 3);
}

/// Test: Resubscription gives up after the configured attempts
#[tokio::test(start_paused = true)]
async fn ending_change_feed_gives_up_after_max_attempts() {
    let mut config = config();
    config.settings.trigger.resubscribe_max_attempts = Some(2);
    let h = Harness::start_with(config).await;
    h.local.set_feed_ends(true);

    let mut docs = h.monitor.documents().unwrap();
    docs.next().await.unwrap().unwrap();
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.local.feed_opens(), 3);
}

/// Test: Silence policy stops listening, the heartbeat still drives probes
#[tokio::test(start_paused = true)]
async fn silenced_change_feed_falls_back_to_heartbeat() {
    let mut config = config();
    config.settings.trigger.source_policy = SourcePolicy::Silence;
    let h = Harness::start_with(config).await;
    h.local.set_feed_ends(true);

    let mut docs = h.monitor.documents().unwrap();
    assert!(docs.next().await.unwrap().unwrap().is_empty());

    h.monitor.put(Document::with_id("unseen")).await.unwrap();
    let started = tokio::time::Instant::now();
    let snapshot = docs.next().await.unwrap().unwrap();

    assert_eq!(snapshot.ids(), vec!["unseen"]);
    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(h.local.feed_opens(), 1);
}

// =============================================================================
// Event Storms
// =============================================================================

/// Test: A steady storm of arm events is debounced to nothing until it stops
#[tokio::test(start_paused = true)]
async fn arm_event_storm_is_debounced() {
    let h = Harness::start().await;
    let mut ratios = h.monitor.sync_status().unwrap();
    ratios.next().await.unwrap();

    let down = h.replicator.arm(ReplicationDirection::Down);
    for i in 0..100 {
        let event = if i % 2 == 0 {
            ReplicationEvent::Active
        } else {
            ReplicationEvent::Paused
        };
        down.emit(event);
        sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(h.local.info_calls(), 1);

    sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.local.info_calls(), 2);
}

/// Test: Many subscribers come and go without leaking probe work
#[tokio::test(start_paused = true)]
async fn subscriber_churn_leaves_nothing_running() {
    let h = Harness::start().await;
    for _ in 0..20 {
        let mut log = h.monitor.status_log().unwrap();
        log.next().await.unwrap().unwrap();
    }
    let calls = h.local.info_calls();

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.local.info_calls(), calls);
}
