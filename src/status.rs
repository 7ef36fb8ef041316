// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Status records: the latest snapshot paired with the latest sync ratio.
//!
//! The composer keeps the last value of each half. A new record goes out when
//! either half changes, once both halves have been seen. An update equal to
//! the half it replaces is dropped.
//!
//! Serialized form:
//!
//! ```json
//! {"docs": [...], "sync code": "0.5", "sync description": "downloading"}
//! ```

use crate::metrics;
use crate::probe::{Snapshot, SnapshotResult, SyncRatio, SyncState};
use crate::store::StoreError;
use crate::subscription::{Subscription, TaskGuard};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info_span, trace, Instrument};

const STATUS_CHANNEL_CAPACITY: usize = 16;

/// An immutable (snapshot, ratio) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    documents: Snapshot,
    ratio: SyncRatio,
}

impl StatusRecord {
    pub fn new(documents: Snapshot, ratio: SyncRatio) -> Self {
        Self { documents, ratio }
    }

    pub fn documents(&self) -> &Snapshot {
        &self.documents
    }

    pub fn ratio(&self) -> SyncRatio {
        self.ratio
    }

    pub fn state(&self) -> SyncState {
        self.ratio.state()
    }

    pub fn description(&self) -> &'static str {
        self.ratio.description()
    }
}

impl Serialize for StatusRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("docs", &self.documents)?;
        map.serialize_entry("sync code", &self.ratio.to_string())?;
        map.serialize_entry("sync description", self.description())?;
        map.end()
    }
}

impl std::fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} docs, sync {} ({})",
            self.documents.len(),
            self.ratio,
            self.description()
        )
    }
}

/// Latest-value combiner with per-half dedup.
#[derive(Debug, Clone, Default)]
pub struct StatusComposer {
    documents: Option<Snapshot>,
    ratio: Option<SyncRatio>,
}

impl StatusComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snapshot. Returns the record to emit, if any.
    pub fn update_documents(&mut self, documents: Snapshot) -> Option<StatusRecord> {
        if self.documents.as_ref() == Some(&documents) {
            return None;
        }
        self.documents = Some(documents);
        self.latest()
    }

    /// Record a ratio. Returns the record to emit, if any.
    pub fn update_ratio(&mut self, ratio: SyncRatio) -> Option<StatusRecord> {
        if self.ratio == Some(ratio) {
            return None;
        }
        self.ratio = Some(ratio);
        self.latest()
    }

    /// The current pair, once both halves are known.
    pub fn latest(&self) -> Option<StatusRecord> {
        match (&self.documents, self.ratio) {
            (Some(documents), Some(ratio)) => Some(StatusRecord::new(documents.clone(), ratio)),
            _ => None,
        }
    }
}

/// Combine a documents stream and a ratio stream into status records.
///
/// A propagated snapshot error is delivered and ends the stream. Either input
/// ending on its own leaves the other driving the output.
pub(crate) fn spawn_status_stream(
    documents: Subscription<SnapshotResult>,
    ratios: Subscription<SyncRatio>,
) -> Subscription<Result<StatusRecord, StoreError>> {
    let (tx, rx) = mpsc::channel(STATUS_CHANNEL_CAPACITY);
    let mut tasks = TaskGuard::new();
    tasks.push(tokio::spawn(
        compose(documents, ratios, tx).instrument(info_span!("status_composer")),
    ));
    Subscription::new(rx, tasks)
}

async fn compose(
    mut documents: Subscription<SnapshotResult>,
    mut ratios: Subscription<SyncRatio>,
    tx: mpsc::Sender<Result<StatusRecord, StoreError>>,
) {
    let mut composer = StatusComposer::new();
    let mut documents_open = true;
    let mut ratios_open = true;

    loop {
        let record = tokio::select! {
            item = documents.next(), if documents_open => match item {
                Some(Ok(snapshot)) => composer.update_documents(snapshot),
                Some(Err(e)) => {
                    debug!(error = %e, "Documents stream failed, status stream ends");
                    let _ = tx.send(Err(e)).await;
                    break;
                }
                None => {
                    documents_open = false;
                    None
                }
            },
            item = ratios.next(), if ratios_open => match item {
                Some(ratio) => composer.update_ratio(ratio),
                None => {
                    ratios_open = false;
                    None
                }
            },
            _ = tx.closed() => break,
        };

        if let Some(record) = record {
            trace!(docs = record.documents().len(), ratio = %record.ratio(), "Status record");
            metrics::record_status_emitted();
            if tx.send(Ok(record)).await.is_err() {
                break;
            }
        }
        if !documents_open && !ratios_open {
            debug!("Both status inputs ended");
            break;
        }
    }
}
