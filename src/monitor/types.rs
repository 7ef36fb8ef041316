//! Monitor state and health types.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Starting
//!    │                              │
//!    │ shutdown()                   │ (index created, arms started)
//!    ↓                              ↓
//! Stopped ←──── ShuttingDown ←── Running
//!                 shutdown()
//!
//! Starting ──(invalid config)──→ Failed
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `ReplicaMonitor::new()`. Nothing running.
//! - **Starting**: `start()` called, creating the index (best effort) and the replication arms.
//! - **Running**: Arms live, error sink attached. Live streams can be opened.
//! - **ShuttingDown**: `shutdown()` called. Arms cancelled, sink stopping.
//! - **Stopped**: Shut down cleanly. Existing subscriptions keep probing until dropped.
//! - **Failed**: `start()` failed. Check logs for details.

use crate::replication::ReplicationDirection;
use crate::probe::{SyncRatio, SyncState};
use serde::Serialize;

/// State of the replica monitor.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    /// Monitor created but not started.
    ///
    /// Call [`start()`](super::ReplicaMonitor::start) to begin.
    Created,

    /// Creating the index and starting the replication arms.
    Starting,

    /// Running. Live streams are available.
    Running,

    /// Shutting down.
    ShuttingDown,

    /// Stopped. Safe to drop.
    Stopped,

    /// Failed to start.
    Failed,
}

impl std::fmt::Display for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorState::Created => write!(f, "Created"),
            MonitorState::Starting => write!(f, "Starting"),
            MonitorState::Running => write!(f, "Running"),
            MonitorState::ShuttingDown => write!(f, "ShuttingDown"),
            MonitorState::Stopped => write!(f, "Stopped"),
            MonitorState::Failed => write!(f, "Failed"),
        }
    }
}

/// What one replication arm has reported so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArmHealth {
    pub direction: ReplicationDirection,
    /// Kind of the last event seen (`active`, `paused`, `error`).
    pub last_event: Option<&'static str>,
    pub last_error: Option<String>,
    pub error_count: u64,
}

impl ArmHealth {
    pub fn new(direction: ReplicationDirection) -> Self {
        Self {
            direction,
            last_event: None,
            last_error: None,
            error_count: 0,
        }
    }
}

/// Result of [`ReplicaMonitor::health_check`](super::ReplicaMonitor::health_check).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub state: MonitorState,
    /// Running and able to serve live streams.
    pub ready: bool,
    /// Ready and the remote answered with usable counts.
    pub healthy: bool,
    pub ratio: SyncRatio,
    pub sync_state: SyncState,
    pub description: &'static str,
    /// Up arm first, then down. Empty before `start()`.
    pub arms: Vec<ArmHealth>,
}
