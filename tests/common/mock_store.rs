//! Mock collaborators for testing.
//!
//! `CountingStore` wraps a `MemoryStore` and counts probe-facing calls, so
//! tests can assert how often the monitor hit the store. Its change feed can
//! be switched to end immediately to exercise source resubscription.
//!
//! `ScriptedReplicator` records every `replicate()` call and keeps the arms so
//! tests can emit lifecycle events by hand.

#![allow(dead_code)]

use futures::StreamExt;
use replica_monitor::document::{Document, PutResponse};
use replica_monitor::error_sink::ErrorReporter;
use replica_monitor::replication::{
    ReplicationArm, ReplicationDirection, ReplicationErrorReport, ReplicationOptions, Replicator,
};
use replica_monitor::store::{
    BoxFuture, ChangeFeed, DocumentStore, FindRequest, IndexSpec, MemoryStore, StoreInfo, StoreRef,
};
use replica_monitor::{MonitorConfig, ReplicaMonitor};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// `MemoryStore` plus call counters.
pub struct CountingStore {
    inner: Arc<MemoryStore>,
    info_calls: AtomicUsize,
    list_calls: AtomicUsize,
    /// `list_all` futures created and not yet completed or dropped.
    list_in_flight: AtomicUsize,
    feed_opens: AtomicUsize,
    /// When set, `watch_changes()` returns a feed that ends at once.
    feed_ends: AtomicBool,
}

impl CountingStore {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(MemoryStore::new(name)),
            info_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            list_in_flight: AtomicUsize::new(0),
            feed_opens: AtomicUsize::new(0),
            feed_ends: AtomicBool::new(false),
        })
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn list_in_flight(&self) -> usize {
        self.list_in_flight.load(Ordering::SeqCst)
    }

    pub fn feed_opens(&self) -> usize {
        self.feed_opens.load(Ordering::SeqCst)
    }

    pub fn set_feed_ends(&self, ends: bool) {
        self.feed_ends.store(ends, Ordering::SeqCst);
    }
}

impl DocumentStore for CountingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, id: &str) -> BoxFuture<'_, Document> {
        self.inner.get(id)
    }

    fn put(&self, doc: Document) -> BoxFuture<'_, PutResponse> {
        self.inner.put(doc)
    }

    fn list_all(&self) -> BoxFuture<'_, Vec<Document>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let pending = InFlight::enter(&self.list_in_flight);
        let list = self.inner.list_all();
        Box::pin(async move {
            let _pending = pending;
            list.await
        })
    }

    fn info(&self) -> BoxFuture<'_, StoreInfo> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.info()
    }

    fn watch_changes(&self) -> ChangeFeed {
        self.feed_opens.fetch_add(1, Ordering::SeqCst);
        if self.feed_ends.load(Ordering::SeqCst) {
            return futures::stream::empty().boxed();
        }
        self.inner.watch_changes()
    }

    fn create_index(&self, index: IndexSpec) -> BoxFuture<'_, ()> {
        self.inner.create_index(index)
    }

    fn find(&self, request: FindRequest) -> BoxFuture<'_, Vec<Document>> {
        self.inner.find(request)
    }

    fn query_view(&self, view: &str) -> BoxFuture<'_, Vec<Document>> {
        self.inner.query_view(view)
    }
}

/// Counts one pending call until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A recorded replicate() call.
#[derive(Debug, Clone)]
pub struct ReplicateCall {
    pub source: String,
    pub target: String,
    pub direction: ReplicationDirection,
    pub options: ReplicationOptions,
}

/// Replicator whose arms are driven by the test.
#[derive(Default)]
pub struct ScriptedReplicator {
    calls: Mutex<Vec<ReplicateCall>>,
    arms: Mutex<Vec<ReplicationArm>>,
}

impl ScriptedReplicator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<ReplicateCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn arm(&self, direction: ReplicationDirection) -> ReplicationArm {
        self.arms
            .lock()
            .unwrap()
            .iter()
            .find(|arm| arm.direction() == direction)
            .cloned()
            .expect("arm not started")
    }
}

impl Replicator for ScriptedReplicator {
    fn replicate(
        &self,
        source: StoreRef,
        target: StoreRef,
        direction: ReplicationDirection,
        options: &ReplicationOptions,
    ) -> ReplicationArm {
        self.calls.lock().unwrap().push(ReplicateCall {
            source: source.name().to_string(),
            target: target.name().to_string(),
            direction,
            options: options.clone(),
        });
        let arm = ReplicationArm::new(direction);
        self.arms.lock().unwrap().push(arm.clone());
        arm
    }
}

/// Records every report it receives.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<ReplicationErrorReport>>,
}

impl RecordingReporter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reports(&self) -> Vec<ReplicationErrorReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn report(&self, report: &ReplicationErrorReport) {
        self.reports.lock().unwrap().push(report.clone());
    }
}

/// Put `n` documents with ids `<prefix>-<i>`.
pub async fn seed(store: &dyn DocumentStore, prefix: &str, n: usize) {
    for i in 0..n {
        store
            .put(Document::with_id(format!("{prefix}-{i}")))
            .await
            .expect("seed put");
    }
}

/// A local/remote pair, a scripted replicator, and a started monitor.
pub struct Harness {
    pub local: Arc<CountingStore>,
    pub remote: Arc<CountingStore>,
    pub replicator: Arc<ScriptedReplicator>,
    pub reporter: Arc<RecordingReporter>,
    pub monitor: ReplicaMonitor,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(MonitorConfig::for_testing("http://remote:5984/db")).await
    }

    pub async fn start_with(config: MonitorConfig) -> Self {
        let local = CountingStore::new("local");
        let remote = CountingStore::new("remote");
        let replicator = ScriptedReplicator::new();
        let reporter = RecordingReporter::new();
        let mut monitor =
            ReplicaMonitor::with_replicator(config, local.clone(), remote.clone(), replicator.clone())
                .with_reporter(reporter.clone());
        monitor.start().await.expect("monitor start");
        Self {
            local,
            remote,
            replicator,
            reporter,
            monitor,
        }
    }
}
