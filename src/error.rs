// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replica monitor.
//!
//! Two layers of errors exist:
//!
//! - [`StoreError`](crate::store::StoreError) is what a document store collaborator
//!   reports for a single operation (missing document, revision conflict, unreachable).
//! - [`MonitorError`] is what the monitor's own API returns. Store failures are wrapped,
//!   never swallowed, when they come from a discrete operation (`get`, `put`, `delete`,
//!   `find`, `create_index`).
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Store(Unavailable)` | Yes | Store or remote temporarily unreachable |
//! | `Store(Conflict)` | Yes | Revision race, re-read and write again |
//! | `Store(NotFound)` | No | No live document with that id |
//! | `Store(Malformed)` | No | Document or metadata rejected by the store |
//! | `Store(Unsupported)` | No | Capability not offered by this store |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Lifecycle violation (e.g. streams before `start()`) |
//! | `Shutdown` | No | Monitor is shutting down |
//!
//! Probe failures never appear here: the live status streams map them to sentinel
//! values (see [`crate::probe`]).

use crate::store::StoreError;
use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors returned by the monitor's public operations.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// A discrete store operation failed.
    ///
    /// Surfaced one-shot to the caller of that operation; this layer never retries.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., subscribing to `documents()` before `start()`).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,
}

impl MonitorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
        }
    }

    /// The store failure behind this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this error is a not-found from the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound { .. }))
    }
}
