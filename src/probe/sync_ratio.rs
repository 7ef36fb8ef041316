// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync ratio: how far the local replica is from the remote.
//!
//! # Decision Table
//!
//! | Outcome | Ratio | State |
//! |---------|-------|-------|
//! | timeout, either `info()` failed | `-2` | offline |
//! | either document count is zero | `-1` | offline |
//! | local == remote | `1` | in sync |
//! | local > remote | `local / remote` (> 1) | uploading |
//! | local < remote | `local / remote` (< 1) | downloading |

use crate::metrics;
use crate::store::{StoreError, StoreRef};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Signed sync health value. Always defined.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncRatio(f64);

impl SyncRatio {
    /// One side is empty (or unreachable without an error).
    pub const OFFLINE: SyncRatio = SyncRatio(-1.0);
    /// The probe timed out or a fetch failed.
    pub const PROBE_FAILED: SyncRatio = SyncRatio(-2.0);
    pub const IN_SYNC: SyncRatio = SyncRatio(1.0);

    pub fn new(value: f64) -> Self {
        Self(value)
    }

    /// Ratio of document counts. A zero on either side is `OFFLINE`.
    pub fn from_counts(local: u64, remote: u64) -> Self {
        if local == 0 || remote == 0 {
            return Self::OFFLINE;
        }
        Self(local as f64 / remote as f64)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn state(&self) -> SyncState {
        SyncState::from_ratio(self.0)
    }

    pub fn description(&self) -> &'static str {
        self.state().description()
    }
}

impl std::fmt::Display for SyncRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Qualitative reading of a [`SyncRatio`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Offline,
    InSync,
    Uploading,
    Downloading,
}

impl SyncState {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio < 0.0 {
            Self::Offline
        } else if ratio == 1.0 {
            Self::InSync
        } else if ratio > 1.0 {
            Self::Uploading
        } else {
            Self::Downloading
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::InSync => "online and in sync",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Why a measurement did not produce a ratio.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ProbeFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Store(StoreError::Unavailable(_)) => "unavailable",
            Self::Store(StoreError::Malformed(_)) => "malformed",
            Self::Store(_) => "store",
        }
    }
}

/// The one place probe failures are absorbed: any failure becomes `PROBE_FAILED`.
pub fn or_sentinel(result: Result<SyncRatio, ProbeFailure>) -> SyncRatio {
    match result {
        Ok(ratio) => ratio,
        Err(failure) => {
            warn!(error = %failure, "Sync ratio probe failed");
            metrics::record_probe_failure("sync_ratio", failure.reason());
            SyncRatio::PROBE_FAILED
        }
    }
}

/// Compares local and remote document counts.
#[derive(Clone)]
pub struct SyncRatioProbe {
    local: StoreRef,
    remote: StoreRef,
    timeout: Duration,
}

impl SyncRatioProbe {
    pub fn new(local: StoreRef, remote: StoreRef, timeout: Duration) -> Self {
        Self {
            local,
            remote,
            timeout,
        }
    }

    /// Fetch both `info()`s concurrently under the timeout.
    pub async fn measure(&self) -> Result<SyncRatio, ProbeFailure> {
        let both = async { tokio::try_join!(self.local.info(), self.remote.info()) };
        let (local, remote) = tokio::time::timeout(self.timeout, both)
            .await
            .map_err(|_| ProbeFailure::Timeout(self.timeout))??;

        trace!(
            local = local.doc_count,
            remote = remote.doc_count,
            "Sync counts"
        );
        Ok(SyncRatio::from_counts(local.doc_count, remote.doc_count))
    }

    /// Measure, never failing.
    pub async fn probe(&self) -> SyncRatio {
        let started = Instant::now();
        let ratio = or_sentinel(self.measure().await);
        metrics::record_probe_latency("sync_ratio", started.elapsed());
        metrics::set_sync_ratio(ratio.value());
        ratio
    }
}
