// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication arms and the replicator collaborator.
//!
//! Live replication is run by an external engine. The monitor only asks it to
//! start one arm per direction and then listens to each arm's lifecycle:
//!
//! ```text
//!            down arm (remote → local)
//!   remote ─────────────────────────────► local
//!          ◄─────────────────────────────
//!            up arm   (local → remote)
//!
//!   each arm emits: Active | Paused | Error(message)
//! ```
//!
//! A [`ReplicationArm`] is a broadcast point: every listener (trigger
//! aggregator, error sink, health tracker) gets its own copy of each event.
//! Events emitted while nobody is listening are dropped.

use crate::store::{Selector, StoreRef};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// Buffered events per listener before it starts lagging.
const ARM_EVENT_CAPACITY: usize = 64;

/// Which way an arm replicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationDirection {
    /// Local → remote.
    Up,
    /// Remote → local.
    Down,
}

impl std::fmt::Display for ReplicationDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Lifecycle event of one replication arm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// Replication resumed or started transferring.
    Active,
    /// Replication caught up, or lost the remote (retrying).
    Paused,
    /// Replication hit an error. The arm keeps retrying on its own.
    Error(String),
}

impl ReplicationEvent {
    /// True for the events that can change what the probes would see.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, Self::Active | Self::Paused)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Error(_) => "error",
        }
    }
}

/// Options passed to the replicator for each arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOptions {
    /// Keep replicating as changes happen.
    pub live: bool,
    /// Retry forever on failure.
    pub retry: bool,
    /// Only replicate documents matching this selector.
    pub selector: Option<Selector>,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            live: true,
            retry: true,
            selector: None,
        }
    }
}

/// An error observed on an arm, as forwarded to the error sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationErrorReport {
    pub direction: ReplicationDirection,
    pub message: String,
}

/// One direction of live replication, seen as a push sequence of lifecycle events.
///
/// Cloning is cheap and all clones share the same event channel and cancel flag.
#[derive(Debug, Clone)]
pub struct ReplicationArm {
    direction: ReplicationDirection,
    events: broadcast::Sender<ReplicationEvent>,
    cancel: Arc<watch::Sender<bool>>,
}

impl ReplicationArm {
    /// Create an arm. Replicator implementations call this and then [`emit`](Self::emit).
    pub fn new(direction: ReplicationDirection) -> Self {
        let (events, _) = broadcast::channel(ARM_EVENT_CAPACITY);
        let (cancel, _) = watch::channel(false);
        Self {
            direction,
            events,
            cancel: Arc::new(cancel),
        }
    }

    pub fn direction(&self) -> ReplicationDirection {
        self.direction
    }

    /// Publish an event to every current listener. Returns how many received it.
    pub fn emit(&self, event: ReplicationEvent) -> usize {
        if self.is_cancelled() {
            debug!(direction = %self.direction, kind = event.kind(), "Event on cancelled arm dropped");
            return 0;
        }
        self.events.send(event).unwrap_or(0)
    }

    /// All events from now on.
    pub fn events(&self) -> BoxStream<'static, ReplicationEvent> {
        let direction = self.direction;
        BroadcastStream::new(self.events.subscribe())
            .filter_map(move |item| async move {
                match item {
                    Ok(event) => Some(event),
                    Err(lagged) => {
                        warn!(%direction, error = ?lagged, "Replication listener lagged, events skipped");
                        None
                    }
                }
            })
            .boxed()
    }

    /// Only `Active` / `Paused` events.
    pub fn lifecycle(&self) -> BoxStream<'static, ReplicationEvent> {
        self.events()
            .filter(|event| futures::future::ready(event.is_lifecycle()))
            .boxed()
    }

    /// Only `Error` events, as reports.
    pub fn errors(&self) -> BoxStream<'static, ReplicationErrorReport> {
        let direction = self.direction;
        self.events()
            .filter_map(move |event| async move {
                match event {
                    ReplicationEvent::Error(message) => {
                        Some(ReplicationErrorReport { direction, message })
                    }
                    _ => None,
                }
            })
            .boxed()
    }

    /// Number of current listeners.
    pub fn listener_count(&self) -> usize {
        self.events.receiver_count()
    }

    /// Ask the replicator to stop this arm. Later events are dropped.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Watch the cancel flag (for replicator implementations).
    pub fn cancelled(&self) -> watch::Receiver<bool> {
        self.cancel.subscribe()
    }
}

/// The replication engine collaborator.
///
/// Starts one live arm from `source` to `target`. The returned arm must
/// report its lifecycle through [`ReplicationArm::emit`] and stop when
/// [`ReplicationArm::cancelled`] flips to `true`.
pub trait Replicator: Send + Sync + 'static {
    fn replicate(
        &self,
        source: StoreRef,
        target: StoreRef,
        direction: ReplicationDirection,
        options: &ReplicationOptions,
    ) -> ReplicationArm;
}

/// A replicator that starts nothing (standalone mode).
///
/// Its arms never emit, so only the change feed and the heartbeat drive the
/// monitor.
#[derive(Debug, Clone, Default)]
pub struct NoOpReplicator;

impl Replicator for NoOpReplicator {
    fn replicate(
        &self,
        source: StoreRef,
        target: StoreRef,
        direction: ReplicationDirection,
        options: &ReplicationOptions,
    ) -> ReplicationArm {
        debug!(
            source = source.name(),
            target = target.name(),
            %direction,
            live = options.live,
            "NoOp: would start replication"
        );
        ReplicationArm::new(direction)
    }
}
