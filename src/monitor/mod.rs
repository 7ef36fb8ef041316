// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replica monitor.
//!
//! The main entry point that ties together:
//! - Two replication arms via a [`Replicator`]
//! - Trigger aggregation via [`crate::trigger::TriggerAggregator`]
//! - The probes in [`crate::probe`]
//! - Status composition via [`crate::status`]
//! - Delayed error reporting via [`crate::error_sink::ErrorSink`]
//!
//! # Architecture
//!
//! ```text
//!   local changes ─┐
//!   up arm ────────┤                      ┌─► SnapshotProbe ──┐
//!   down arm ──────┼─► TriggerAggregator ─┤                   ├─► StatusComposer ─► status_log()
//!   heartbeat ─────┘                      └─► SyncRatioProbe ─┘
//!
//!   up/down arm errors ─► ErrorSink ─► ErrorReporter
//! ```
//!
//! Every call to `documents()`, `sync_status()`, `status_log()` or `view()`
//! builds its own graph of tasks, owned by the returned [`Subscription`].

mod types;

pub use types::{ArmHealth, HealthCheck, MonitorState};

use crate::config::MonitorConfig;
use crate::document::{generate_id, Document, DocumentFixup, PutResponse};
use crate::error::{MonitorError, Result};
use crate::error_sink::{ErrorReporter, ErrorSink, ErrorSinkHandle, TracingReporter};
use crate::metrics;
use crate::probe::{spawn_probe_stream, SnapshotProbe, SnapshotResult, SyncRatio, SyncRatioProbe};
use crate::replication::{
    NoOpReplicator, ReplicationArm, ReplicationDirection, ReplicationEvent, Replicator,
};
use crate::status::{spawn_status_stream, StatusRecord};
use crate::store::{FindRequest, IndexSpec, StoreError, StoreRef};
use crate::subscription::Subscription;
use crate::trigger::{
    fan_out, ArmLifecycleSource, ChangeFeedSource, HeartbeatTicker, Tick, TriggerAggregator,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Live view over a local replica and its remote.
///
/// # Example
///
/// ```rust,no_run
/// use replica_monitor::{MemoryStore, MonitorConfig, ReplicaMonitor, StoreRef};
/// use std::sync::Arc;
///
/// # async fn example() -> replica_monitor::Result<()> {
/// let config = MonitorConfig::default();
/// let local: StoreRef = Arc::new(MemoryStore::new(config.local_name()));
/// let remote: StoreRef = Arc::new(MemoryStore::new("remote"));
///
/// let mut monitor = ReplicaMonitor::new(config, local, remote);
/// monitor.start().await?;
///
/// let mut status = monitor.status_log()?;
/// while let Some(Ok(record)) = status.next().await {
///     println!("{}", record);
/// }
/// monitor.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ReplicaMonitor {
    config: MonitorConfig,

    /// Local replica.
    local: StoreRef,

    /// Remote counterpart.
    remote: StoreRef,

    replicator: Arc<dyn Replicator>,

    reporter: Arc<dyn ErrorReporter>,

    fixup: DocumentFixup,

    state_tx: watch::Sender<MonitorState>,
    state_rx: watch::Receiver<MonitorState>,

    /// Up arm, then down arm. Empty until `start()`.
    arms: Vec<ReplicationArm>,

    /// Per-arm event bookkeeping for `health_check()`.
    arm_health: Arc<RwLock<HashMap<ReplicationDirection, ArmHealth>>>,

    tracker_handles: Vec<JoinHandle<()>>,

    error_sink: Option<ErrorSinkHandle>,
}

impl ReplicaMonitor {
    /// Create a monitor with no replication (standalone).
    ///
    /// The monitor starts in `Created` state. Call [`start()`](Self::start)
    /// before opening live streams.
    pub fn new(config: MonitorConfig, local: StoreRef, remote: StoreRef) -> Self {
        Self::with_replicator(config, local, remote, Arc::new(NoOpReplicator))
    }

    /// Create a monitor that starts its arms through `replicator`.
    pub fn with_replicator(
        config: MonitorConfig,
        local: StoreRef,
        remote: StoreRef,
        replicator: Arc<dyn Replicator>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(MonitorState::Created);
        let fixup = config.fixup();
        Self {
            config,
            local,
            remote,
            replicator,
            reporter: Arc::new(TracingReporter),
            fixup,
            state_tx,
            state_rx,
            arms: Vec::new(),
            arm_health: Arc::new(RwLock::new(HashMap::new())),
            tracker_handles: Vec::new(),
            error_sink: None,
        }
    }

    /// Replace the error reporter (default: [`TracingReporter`]).
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn local(&self) -> &StoreRef {
        &self.local
    }

    pub fn remote(&self) -> &StoreRef {
        &self.remote
    }

    /// The started arms (up, then down).
    pub fn arms(&self) -> &[ReplicationArm] {
        &self.arms
    }

    /// Get current state.
    pub fn state(&self) -> MonitorState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<MonitorState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), MonitorState::Running)
    }

    fn set_state(&self, state: MonitorState) {
        self.state_tx.send_replace(state);
        metrics::set_monitor_state(&state.to_string());
    }

    /// Start the monitor.
    ///
    /// 1. Validates the config
    /// 2. Creates the local index (if a selector or index is configured).
    ///    A failure is logged and start continues.
    /// 3. Starts the down arm (remote → local) and the up arm (local → remote)
    /// 4. Attaches the error sink (if enabled)
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != MonitorState::Created {
            return Err(MonitorError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            local = %self.local.name(),
            remote = %self.config.remote_address,
            "Starting replica monitor"
        );
        self.set_state(MonitorState::Starting);

        if let Err(e) = self.config.validate() {
            error!(error = %e, "Invalid monitor config");
            self.set_state(MonitorState::Failed);
            return Err(e);
        }

        if let Some(index) = self.config.replication.startup_index() {
            debug!(fields = ?index.fields, "Creating local index");
            if let Err(e) = self.local.create_index(index).await {
                warn!(error = %e, "Failed to create local index, filtered queries run unindexed");
            }
        }

        let options = self.config.replication_options();
        let up = self.replicator.replicate(
            Arc::clone(&self.local),
            Arc::clone(&self.remote),
            ReplicationDirection::Up,
            &options,
        );
        let down = self.replicator.replicate(
            Arc::clone(&self.remote),
            Arc::clone(&self.local),
            ReplicationDirection::Down,
            &options,
        );
        self.arms = vec![up, down];

        self.spawn_arm_trackers().await;

        if self.config.settings.error_sink.enabled {
            let sink = ErrorSink::new(
                self.config.settings.error_sink.delay_duration(),
                Arc::clone(&self.reporter),
            );
            self.error_sink = Some(sink.attach(&self.arms));
        }

        self.set_state(MonitorState::Running);
        info!(
            live = options.live,
            filtered = options.selector.is_some(),
            "Replica monitor running"
        );
        Ok(())
    }

    /// Track each arm's last event and error count.
    async fn spawn_arm_trackers(&mut self) {
        let mut health = self.arm_health.write().await;
        for arm in &self.arms {
            let direction = arm.direction();
            health.insert(direction, ArmHealth::new(direction));

            let mut events = arm.events();
            let arm_health = Arc::clone(&self.arm_health);
            let handle = tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    let mut guard = arm_health.write().await;
                    let entry = guard
                        .entry(direction)
                        .or_insert_with(|| ArmHealth::new(direction));
                    entry.last_event = Some(event.kind());
                    if let ReplicationEvent::Error(message) = event {
                        entry.error_count += 1;
                        entry.last_error = Some(message);
                    }
                }
            });
            self.tracker_handles.push(handle);
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match self.state() {
            MonitorState::Running => Ok(()),
            MonitorState::ShuttingDown | MonitorState::Stopped => Err(MonitorError::Shutdown),
            other => Err(MonitorError::InvalidState {
                expected: "Running".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// The aggregator over local changes, both arms and the heartbeat.
    fn triggers(&self) -> TriggerAggregator {
        let trigger = &self.config.settings.trigger;
        let mut aggregator = TriggerAggregator::new(trigger.debounce_duration())
            .source_policy(trigger.source_policy, trigger.retry_config())
            .with_source(ChangeFeedSource::new(Arc::clone(&self.local)));
        for arm in &self.arms {
            aggregator = aggregator.with_source(ArmLifecycleSource::new(arm.clone()));
        }
        aggregator.with_source(HeartbeatTicker::new(trigger.heartbeat_duration()))
    }

    fn snapshot_probe(&self) -> SnapshotProbe {
        let probe = &self.config.settings.probe;
        SnapshotProbe::new(Arc::clone(&self.local), self.fixup.clone())
            .internal_prefix(probe.internal_id_prefix.clone())
            .failure_policy(probe.snapshot_failure)
            .timeout(probe.snapshot_timeout_duration())
    }

    fn sync_ratio_probe(&self) -> SyncRatioProbe {
        SyncRatioProbe::new(
            Arc::clone(&self.local),
            Arc::clone(&self.remote),
            self.config.settings.probe.sync_timeout_duration(),
        )
    }

    /// Live snapshots of the local document set.
    ///
    /// The first snapshot arrives right away. After that, one per trigger tick
    /// whose result differs from the previous one.
    pub fn documents(&self) -> Result<Subscription<SnapshotResult>> {
        self.ensure_running()?;
        Ok(snapshot_stream(self.triggers().subscribe(), self.snapshot_probe()))
    }

    /// Live sync ratios. The first arrives right away.
    pub fn sync_status(&self) -> Result<Subscription<SyncRatio>> {
        self.ensure_running()?;
        Ok(ratio_stream(self.triggers().subscribe(), self.sync_ratio_probe()))
    }

    /// Live status records: latest snapshot and ratio, one record per change.
    pub fn status_log(&self) -> Result<Subscription<std::result::Result<StatusRecord, StoreError>>> {
        self.ensure_running()?;
        let (for_documents, for_ratio) = fan_out(self.triggers().subscribe());
        let documents = snapshot_stream(for_documents, self.snapshot_probe());
        let ratios = ratio_stream(for_ratio, self.sync_ratio_probe());
        Ok(spawn_status_stream(documents, ratios))
    }

    /// Live snapshots of a named view on the remote.
    ///
    /// Queried once right away, then again on every remote change.
    pub fn view(&self, name: &str) -> Result<Subscription<SnapshotResult>> {
        self.ensure_running()?;
        let trigger = &self.config.settings.trigger;
        let ticks = TriggerAggregator::new(Duration::ZERO)
            .source_policy(trigger.source_policy, trigger.retry_config())
            .with_source(ChangeFeedSource::new(Arc::clone(&self.remote)))
            .subscribe();
        let probe = SnapshotProbe::for_view(Arc::clone(&self.remote), name, self.fixup.clone())
            .internal_prefix(self.config.settings.probe.internal_id_prefix.clone())
            .failure_policy(self.config.settings.probe.snapshot_failure)
            .timeout(self.config.settings.probe.snapshot_timeout_duration());
        debug!(view = name, "Opening view stream");
        Ok(snapshot_stream(ticks, probe))
    }

    /// Run both probes once.
    ///
    /// A failed snapshot fetch is returned as an error; ratio failures map to
    /// the sentinel values as usual.
    pub async fn current_status(&self) -> Result<StatusRecord> {
        let snapshot_probe = self.snapshot_probe();
        let ratio_probe = self.sync_ratio_probe();
        let (documents, ratio) = tokio::join!(snapshot_probe.fetch(), ratio_probe.probe());
        Ok(StatusRecord::new(documents?, ratio))
    }

    /// Get health status for monitoring endpoints.
    ///
    /// Runs one sync ratio probe, so this waits up to the sync timeout.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let ratio = self.sync_ratio_probe().probe().await;

        let health = self.arm_health.read().await;
        let arms = self
            .arms
            .iter()
            .map(|arm| {
                health
                    .get(&arm.direction())
                    .cloned()
                    .unwrap_or_else(|| ArmHealth::new(arm.direction()))
            })
            .collect();

        let ready = state == MonitorState::Running;
        let healthy = ready && ratio.value() >= 0.0;

        HealthCheck {
            state,
            ready,
            healthy,
            ratio,
            sync_state: ratio.state(),
            description: ratio.description(),
            arms,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Pass-through document operations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Write a document to the local replica.
    ///
    /// A missing or empty `_id` is replaced by a fresh UUIDv4.
    pub async fn put(&self, mut doc: Document) -> Result<PutResponse> {
        if doc.needs_id() {
            doc.set_id(generate_id());
        }
        Ok(self.local.put(doc).await?)
    }

    pub async fn get(&self, id: &str) -> Result<Document> {
        Ok(self.local.get(id).await?)
    }

    /// Logically delete: read the current revision, write it back with `_deleted: true`.
    pub async fn delete(&self, id: &str) -> Result<PutResponse> {
        let mut doc = self.local.get(id).await?;
        doc.mark_deleted();
        Ok(self.local.put(doc).await?)
    }

    pub async fn find(&self, request: FindRequest) -> Result<Vec<Document>> {
        Ok(self.local.find(request).await?)
    }

    pub async fn create_index(&self, index: IndexSpec) -> Result<()> {
        Ok(self.local.create_index(index).await?)
    }

    /// Shut down the monitor.
    ///
    /// 1. Cancels both replication arms
    /// 2. Stops the error sink (pending delayed reports are dropped)
    /// 3. Stops the arm trackers
    ///
    /// Live subscriptions already handed out keep running until dropped.
    pub async fn shutdown(&mut self) {
        if matches!(self.state(), MonitorState::Stopped) {
            return;
        }
        info!("Shutting down replica monitor");
        self.set_state(MonitorState::ShuttingDown);

        for arm in &self.arms {
            arm.cancel();
            debug!(direction = %arm.direction(), "Replication arm cancelled");
        }

        if let Some(sink) = self.error_sink.take() {
            sink.stop();
        }

        let handles = std::mem::take(&mut self.tracker_handles);
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(error = %e, "Arm tracker panicked");
                }
            }
        }

        self.set_state(MonitorState::Stopped);
        info!("Replica monitor stopped");
    }
}

impl Drop for ReplicaMonitor {
    fn drop(&mut self) {
        for handle in &self.tracker_handles {
            handle.abort();
        }
    }
}

fn snapshot_stream(ticks: Subscription<Tick>, probe: SnapshotProbe) -> Subscription<SnapshotResult> {
    let label = probe.label();
    let probe = Arc::new(probe);
    spawn_probe_stream(ticks, label, move || {
        let probe = Arc::clone(&probe);
        async move { probe.probe().await }
    })
}

fn ratio_stream(ticks: Subscription<Tick>, probe: SyncRatioProbe) -> Subscription<SyncRatio> {
    let probe = Arc::new(probe);
    spawn_probe_stream(ticks, "sync_ratio", move || {
        let probe = Arc::clone(&probe);
        async move { Some(probe.probe().await) }
    })
}
