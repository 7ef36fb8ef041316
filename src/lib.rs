//! # Replica Monitor
//!
//! A live, push-based view over a bidirectionally replicated document store:
//! the current local document set, and a sync ratio saying whether the local
//! replica is caught up with its remote.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                             replica-monitor                               │
//! │                                                                           │
//! │  ┌──────────────┐                                                         │
//! │  │ change feed  │──┐                       ┌───────────────┐              │
//! │  ├──────────────┤  │  ┌─────────────────┐  │ SnapshotProbe │──┐           │
//! │  │ up / down    │──┼─►│ TriggerAggreg.  │─►├───────────────┤  ├─► status  │
//! │  │ arm events   │  │  │ (debounce)      │  │ SyncRatioProbe│──┘           │
//! │  ├──────────────┤  │  └─────────────────┘  └───────────────┘              │
//! │  │ heartbeat    │──┘                                                      │
//! │  └──────────────┘        arm errors ─► ErrorSink ─► ErrorReporter         │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The store ([`DocumentStore`]) and the replication engine ([`Replicator`])
//! are collaborators behind traits. [`MemoryStore`] and [`NoOpReplicator`]
//! are in-process implementations.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica_monitor::{MemoryStore, MonitorConfig, ReplicaMonitor, StoreRef};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = MonitorConfig::default();
//!     let local: StoreRef = Arc::new(MemoryStore::new(config.local_name()));
//!     let remote: StoreRef = Arc::new(MemoryStore::new("remote"));
//!
//!     let mut monitor = ReplicaMonitor::new(config, local, remote);
//!     monitor.start().await.expect("Failed to start");
//!
//!     let mut ratios = monitor.sync_status().expect("running");
//!     if let Some(ratio) = ratios.next().await {
//!         println!("sync {} ({})", ratio, ratio.description());
//!     }
//!
//!     monitor.shutdown().await;
//! }
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod error_sink;
pub mod metrics;
pub mod monitor;
pub mod probe;
pub mod replication;
pub mod resilience;
pub mod status;
pub mod store;
pub mod subscription;
pub mod trigger;

// Re-exports for convenience
pub use config::{MonitorConfig, MonitorSettings, ProbeConfig, TriggerConfig};
pub use document::{Document, DocumentFixup, PutResponse};
pub use error::{MonitorError, Result};
pub use error_sink::{ErrorReporter, ErrorSink, TracingReporter};
pub use monitor::{HealthCheck, MonitorState, ReplicaMonitor};
pub use probe::{Snapshot, SnapshotFailurePolicy, SnapshotResult, SyncRatio, SyncState};
pub use replication::{
    NoOpReplicator, ReplicationArm, ReplicationDirection, ReplicationEvent, ReplicationOptions,
    Replicator,
};
pub use status::{StatusComposer, StatusRecord};
pub use store::{DocumentStore, MemoryStore, StoreError, StoreRef};
pub use subscription::Subscription;
pub use trigger::{SourcePolicy, Tick};
