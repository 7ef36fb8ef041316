// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription handles for live streams.
//!
//! Every live stream (`documents`, `sync_status`, `status_log`, ticks) is a
//! set of spawned tasks feeding a bounded channel. The consumer holds a
//! [`Subscription`]: the receiving end plus the task handles.
//!
//! Dropping the subscription aborts its tasks. Each task owns the
//! subscriptions it consumes, so teardown cascades all the way down to the
//! heartbeat timer and the replication listeners.

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Aborts the held tasks on drop.
#[derive(Debug, Default)]
pub(crate) struct TaskGuard {
    handles: Vec<JoinHandle<()>>,
}

impl TaskGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handles.iter().all(JoinHandle::is_finished)
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

/// A live push sequence of `T`.
///
/// Receive with [`next`](Self::next) or as a [`futures::Stream`]. Drop it
/// (or call [`unsubscribe`](Self::unsubscribe)) to tear everything down.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
    tasks: TaskGuard,
}

impl<T> Subscription<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, tasks: TaskGuard) -> Self {
        Self { rx, tasks }
    }

    /// Wait for the next value. `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a value if one is ready.
    pub fn try_next(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// True once every task behind this subscription has stopped.
    pub fn is_finished(&self) -> bool {
        self.tasks.is_finished()
    }

    /// Stop receiving and tear down the stream.
    pub fn unsubscribe(self) {}
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
