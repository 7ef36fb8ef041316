// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document snapshots: the user-visible document set at one point in time.

use crate::document::{Document, DocumentFixup};
use crate::metrics;
use crate::store::{StoreError, StoreRef, StoreResult};
use serde::{Deserialize, Serialize, Serializer};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{trace, warn};

/// Upper bound on one fetch unless configured otherwise.
pub const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(5);

/// What a failed fetch does to the documents stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotFailurePolicy {
    /// Log it; the previous snapshot stands.
    #[default]
    KeepLast,
    /// Deliver an empty snapshot.
    Empty,
    /// Deliver the error and end the stream.
    Propagate,
}

/// An immutable, cheaply cloned list of documents in store listing order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot(Arc<Vec<Document>>);

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self(Arc::new(documents))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> &[Document] {
        &self.0
    }

    /// Ids in listing order.
    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().filter_map(Document::id).collect()
    }
}

impl Deref for Snapshot {
    type Target = [Document];

    fn deref(&self) -> &[Document] {
        &self.0
    }
}

impl From<Vec<Document>> for Snapshot {
    fn from(documents: Vec<Document>) -> Self {
        Self::new(documents)
    }
}

impl Serialize for Snapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.as_slice().serialize(serializer)
    }
}

/// Item of a documents stream. `Err` only under [`SnapshotFailurePolicy::Propagate`].
pub type SnapshotResult = Result<Snapshot, StoreError>;

/// Where a snapshot comes from.
#[derive(Clone)]
pub enum SnapshotSource {
    /// Every live document of a store.
    AllDocs(StoreRef),
    /// The result of a named view.
    View { store: StoreRef, view: String },
}

impl SnapshotSource {
    async fn fetch(&self) -> StoreResult<Vec<Document>> {
        match self {
            Self::AllDocs(store) => store.list_all().await,
            Self::View { store, view } => store.query_view(view).await,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::AllDocs(_) => "snapshot",
            Self::View { .. } => "view",
        }
    }
}

/// Fetches, filters and fixes up a document set.
#[derive(Clone)]
pub struct SnapshotProbe {
    source: SnapshotSource,
    fixup: DocumentFixup,
    internal_prefix: String,
    policy: SnapshotFailurePolicy,
    timeout: Duration,
}

impl SnapshotProbe {
    /// All documents of `store`, hiding ids starting with `_d`, keeping the last
    /// snapshot on failure.
    pub fn new(store: StoreRef, fixup: DocumentFixup) -> Self {
        Self::from_source(SnapshotSource::AllDocs(store), fixup)
    }

    /// The named view of `store`.
    pub fn for_view(store: StoreRef, view: impl Into<String>, fixup: DocumentFixup) -> Self {
        Self::from_source(
            SnapshotSource::View {
                store,
                view: view.into(),
            },
            fixup,
        )
    }

    pub fn from_source(source: SnapshotSource, fixup: DocumentFixup) -> Self {
        Self {
            source,
            fixup,
            internal_prefix: "_d".to_string(),
            policy: SnapshotFailurePolicy::default(),
            timeout: DEFAULT_SNAPSHOT_TIMEOUT,
        }
    }

    pub fn internal_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.internal_prefix = prefix.into();
        self
    }

    pub fn failure_policy(mut self, policy: SnapshotFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound each fetch. An elapsed fetch is dropped and counts as
    /// [`StoreError::Unavailable`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn policy(&self) -> SnapshotFailurePolicy {
        self.policy
    }

    pub fn label(&self) -> &'static str {
        self.source.label()
    }

    /// One fetch under the timeout, no failure policy applied.
    pub async fn fetch(&self) -> StoreResult<Snapshot> {
        let documents = tokio::time::timeout(self.timeout, self.source.fetch())
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "{} fetch timed out after {:?}",
                    self.label(),
                    self.timeout
                ))
            })??;
        let total = documents.len();
        let visible: Vec<Document> = documents
            .into_iter()
            .filter(|doc| !doc.is_internal(&self.internal_prefix))
            .map(|doc| self.fixup.apply(doc))
            .collect();
        trace!(total, visible = visible.len(), "Snapshot fetched");
        Ok(Snapshot::new(visible))
    }

    /// One fetch with the failure policy applied. `None` means "keep the last one".
    pub async fn probe(&self) -> Option<SnapshotResult> {
        let started = Instant::now();
        let result = self.fetch().await;
        let elapsed = started.elapsed();
        metrics::record_probe_latency(self.label(), elapsed);

        match result {
            Ok(snapshot) => Some(Ok(snapshot)),
            Err(e) => {
                let reason = if elapsed >= self.timeout { "timeout" } else { "fetch" };
                metrics::record_probe_failure(self.label(), reason);
                match self.policy {
                    SnapshotFailurePolicy::KeepLast => {
                        warn!(error = %e, "Snapshot fetch failed, keeping last snapshot");
                        None
                    }
                    SnapshotFailurePolicy::Empty => {
                        warn!(error = %e, "Snapshot fetch failed, delivering empty snapshot");
                        Some(Ok(Snapshot::empty()))
                    }
                    SnapshotFailurePolicy::Propagate => {
                        warn!(error = %e, "Snapshot fetch failed, ending stream");
                        Some(Err(e))
                    }
                }
            }
        }
    }
}
