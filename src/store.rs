// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store integration traits.
//!
//! Defines the interface the monitor needs from a document store. Both the local
//! replica and the remote counterpart are reached through the same trait, as
//! `Arc<dyn DocumentStore>` handles ([`StoreRef`]).
//!
//! The monitor only ever reads through these handles on its live paths
//! (`list_all`, `info`, `watch_changes`, `query_view`) and writes through them
//! on the pass-through operations (`put`). Conflict resolution and tombstoning
//! are the store's business.
//!
//! [`MemoryStore`] is a functional in-memory implementation used in standalone
//! mode and in tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_monitor::store::{DocumentStore, MemoryStore};
//! use replica_monitor::Document;
//!
//! # async fn example() -> Result<(), replica_monitor::store::StoreError> {
//! let store = MemoryStore::new("tasks");
//! let written = store.put(Document::with_id("task-1").with_field("title", "milk")).await?;
//! let doc = store.get(&written.id).await?;
//! assert_eq!(doc.rev(), Some(written.rev.as_str()));
//! # Ok(())
//! # }
//! ```

use crate::document::{Document, PutResponse};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Live sequence of change tokens, starting from "now".
pub type ChangeFeed = BoxStream<'static, StoreResult<ChangeToken>>;

/// Shared handle to a store.
pub type StoreRef = Arc<dyn DocumentStore>;

/// Mango-style selector: field name to expected value or operator object.
pub type Selector = Map<String, Value>;

/// Errors reported by a store for a single operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No live document with this id.
    #[error("document not found: {id}")]
    NotFound { id: String },

    /// The write carried a stale (or missing) revision.
    #[error("document update conflict: {id}")]
    Conflict { id: String },

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the input or returned something unusable.
    #[error("malformed: {0}")]
    Malformed(String),

    /// The store does not offer this capability.
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl StoreError {
    /// Check if retrying the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Conflict { .. })
    }
}

/// Opaque "something local changed" marker.
///
/// Carries the store's update sequence for logging only; nothing relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeToken {
    seq: u64,
}

impl ChangeToken {
    pub fn new(seq: u64) -> Self {
        Self { seq }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Store metadata as returned by `info()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    pub db_name: String,
    /// Number of live (non-deleted) documents, design documents included.
    pub doc_count: u64,
    pub update_seq: u64,
}

/// Index definition for `create_index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            name: None,
        }
    }
}

/// Query for `find`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FindRequest {
    pub selector: Selector,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl FindRequest {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            limit: None,
        }
    }
}

/// Trait defining what we need from a document store.
///
/// Implemented by the local replica and the remote handle alike. All methods
/// take `&self`; implementations are shared across tasks without external locking.
pub trait DocumentStore: Send + Sync + 'static {
    /// Human-readable store name (for logs and `info()`).
    fn name(&self) -> &str;

    /// Fetch a live document. Deleted or unknown ids are `NotFound`.
    fn get(&self, id: &str) -> BoxFuture<'_, Document>;

    /// Write a full document. The store assigns the new revision.
    fn put(&self, doc: Document) -> BoxFuture<'_, PutResponse>;

    /// All live documents with content, no attachment binaries, in the store's listing order.
    fn list_all(&self) -> BoxFuture<'_, Vec<Document>>;

    /// Store metadata (at least the document count).
    fn info(&self) -> BoxFuture<'_, StoreInfo>;

    /// Live change notifications from now on.
    fn watch_changes(&self) -> ChangeFeed;

    /// Create a query index.
    fn create_index(&self, index: IndexSpec) -> BoxFuture<'_, ()>;

    /// Query by selector.
    fn find(&self, request: FindRequest) -> BoxFuture<'_, Vec<Document>>;

    /// Query a named view.
    ///
    /// Default: unsupported.
    fn query_view(&self, view: &str) -> BoxFuture<'_, Vec<Document>> {
        let view = view.to_string();
        Box::pin(async move { Err(StoreError::Unsupported(format!("view {view}"))) })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Selector matching (used by MemoryStore)
// ═══════════════════════════════════════════════════════════════════════════════

/// Check a document against a selector.
///
/// Supports top-level field equality and the `$eq`, `$ne`, `$gt`, `$gte`,
/// `$lt`, `$lte` and `$exists` operators. Every clause must match.
pub fn matches_selector(selector: &Selector, doc: &Document) -> bool {
    selector.iter().all(|(field, condition)| {
        let actual = doc.get(field);
        match condition {
            Value::Object(ops) if ops.keys().all(|k| k.starts_with('$')) && !ops.is_empty() => {
                ops.iter().all(|(op, expected)| match_operator(op, actual, expected))
            }
            expected => actual == Some(expected),
        }
    })
}

fn match_operator(op: &str, actual: Option<&Value>, expected: &Value) -> bool {
    match op {
        "$eq" => actual == Some(expected),
        "$ne" => actual != Some(expected),
        "$exists" => actual.is_some() == expected.as_bool().unwrap_or(true),
        "$gt" => compare(actual, expected) == Some(CmpOrdering::Greater),
        "$gte" => matches!(compare(actual, expected), Some(CmpOrdering::Greater | CmpOrdering::Equal)),
        "$lt" => compare(actual, expected) == Some(CmpOrdering::Less),
        "$lte" => matches!(compare(actual, expected), Some(CmpOrdering::Less | CmpOrdering::Equal)),
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<CmpOrdering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MemoryStore
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MemoryState {
    /// Live documents and tombstones, id-ordered.
    docs: BTreeMap<String, Document>,
    update_seq: u64,
    indexes: Vec<IndexSpec>,
    views: HashMap<String, Selector>,
}

/// In-memory document store.
///
/// Behaves like a small CouchDB-style database:
/// - listing is ordered by id
/// - revisions are `<generation>-<uuid>`
/// - writes to an existing live document must carry its current `_rev`
/// - deletes are tombstones (`_deleted: true`) that hide the document from reads
///
/// Two simulation knobs exist for exercising degraded paths: a per-operation
/// latency and an "unreachable" switch that fails every operation except the
/// change feed.
pub struct MemoryStore {
    name: String,
    state: RwLock<MemoryState>,
    changes: broadcast::Sender<ChangeToken>,
    unreachable: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(name: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            name: name.into(),
            state: RwLock::new(MemoryState::default()),
            changes,
            unreachable: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Make every operation fail with `Unavailable` (or succeed again).
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::SeqCst)
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Define a named view as a selector over live documents.
    pub async fn define_view(&self, name: impl Into<String>, selector: Selector) {
        self.state.write().await.views.insert(name.into(), selector);
    }

    /// Indexes created so far.
    pub async fn indexes(&self) -> Vec<IndexSpec> {
        self.state.read().await.indexes.clone()
    }

    /// Apply the simulation knobs.
    async fn simulate(&self) -> StoreResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.is_unreachable() {
            return Err(StoreError::Unavailable(format!("{} is unreachable", self.name)));
        }
        Ok(())
    }

    fn live_docs(state: &MemoryState) -> impl Iterator<Item = &Document> {
        state.docs.values().filter(|d| !d.is_deleted())
    }
}

fn revision_generation(rev: &str) -> u64 {
    rev.split('-')
        .next()
        .and_then(|g| g.parse().ok())
        .unwrap_or(0)
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, id: &str) -> BoxFuture<'_, Document> {
        let id = id.to_string();
        Box::pin(async move {
            self.simulate().await?;
            let state = self.state.read().await;
            match state.docs.get(&id) {
                Some(doc) if !doc.is_deleted() => Ok(doc.clone()),
                _ => Err(StoreError::NotFound { id }),
            }
        })
    }

    fn put(&self, mut doc: Document) -> BoxFuture<'_, PutResponse> {
        Box::pin(async move {
            self.simulate().await?;
            let id = match doc.id() {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => return Err(StoreError::Malformed("document has no _id".to_string())),
            };

            let mut state = self.state.write().await;
            let previous_generation = match state.docs.get(&id) {
                Some(existing) if !existing.is_deleted() => {
                    if existing.rev() != doc.rev() {
                        return Err(StoreError::Conflict { id });
                    }
                    existing.rev().map(revision_generation).unwrap_or(0)
                }
                // Recreating over a tombstone continues its revision history
                Some(tombstone) => tombstone.rev().map(revision_generation).unwrap_or(0),
                None => 0,
            };

            let rev = format!("{}-{}", previous_generation + 1, Uuid::new_v4().simple());
            doc.set_rev(rev.clone());
            state.docs.insert(id.clone(), doc);
            state.update_seq += 1;
            let seq = state.update_seq;
            drop(state);

            // No receivers is fine
            let _ = self.changes.send(ChangeToken::new(seq));
            Ok(PutResponse { id, rev })
        })
    }

    fn list_all(&self) -> BoxFuture<'_, Vec<Document>> {
        Box::pin(async move {
            self.simulate().await?;
            let state = self.state.read().await;
            Ok(Self::live_docs(&state).cloned().collect())
        })
    }

    fn info(&self) -> BoxFuture<'_, StoreInfo> {
        Box::pin(async move {
            self.simulate().await?;
            let state = self.state.read().await;
            Ok(StoreInfo {
                db_name: self.name.clone(),
                doc_count: Self::live_docs(&state).count() as u64,
                update_seq: state.update_seq,
            })
        })
    }

    fn watch_changes(&self) -> ChangeFeed {
        let name = self.name.clone();
        BroadcastStream::new(self.changes.subscribe())
            .map(move |item| match item {
                Ok(token) => Ok(token),
                Err(missed) => {
                    // Lagging only means more changes happened than we saw
                    tracing::debug!(store = %name, error = ?missed, "Change feed lagged");
                    Ok(ChangeToken::default())
                }
            })
            .boxed()
    }

    fn create_index(&self, index: IndexSpec) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.simulate().await?;
            if index.fields.is_empty() {
                return Err(StoreError::Malformed("index has no fields".to_string()));
            }
            let mut state = self.state.write().await;
            if !state.indexes.contains(&index) {
                state.indexes.push(index);
            }
            Ok(())
        })
    }

    fn find(&self, request: FindRequest) -> BoxFuture<'_, Vec<Document>> {
        Box::pin(async move {
            self.simulate().await?;
            let state = self.state.read().await;
            let matching = Self::live_docs(&state)
                .filter(|doc| matches_selector(&request.selector, doc))
                .take(request.limit.unwrap_or(usize::MAX))
                .cloned()
                .collect();
            Ok(matching)
        })
    }

    fn query_view(&self, view: &str) -> BoxFuture<'_, Vec<Document>> {
        let view = view.to_string();
        Box::pin(async move {
            self.simulate().await?;
            let state = self.state.read().await;
            let selector = state
                .views
                .get(&view)
                .ok_or_else(|| StoreError::NotFound { id: view.clone() })?;
            Ok(Self::live_docs(&state)
                .filter(|doc| matches_selector(selector, doc))
                .cloned()
                .collect())
        })
    }
}
