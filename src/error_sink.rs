// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delayed forwarding of replication errors.
//!
//! Both arms' `Error` events are merged. Each one is held for a fixed delay
//! and then handed to an [`ErrorReporter`]. Delays run concurrently, so a
//! burst of errors is reported as a burst one delay later. Nothing here
//! retries replication; the arms do that on their own.

use crate::metrics;
use crate::replication::{ReplicationArm, ReplicationErrorReport};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info_span, Instrument};

/// Receives replication errors after the delay.
pub trait ErrorReporter: Send + Sync + 'static {
    fn report(&self, report: &ReplicationErrorReport);
}

/// Reports through `tracing` at `error` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, report: &ReplicationErrorReport) {
        error!(
            direction = %report.direction,
            message = %report.message,
            "Replication error"
        );
    }
}

#[derive(Clone)]
pub struct ErrorSink {
    delay: Duration,
    reporter: Arc<dyn ErrorReporter>,
}

impl ErrorSink {
    pub fn new(delay: Duration, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { delay, reporter }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Start listening to `arms`. Errors emitted after this call are reported.
    ///
    /// Dropping the handle stops the sink, discarding reports still waiting out
    /// their delay.
    pub fn attach(&self, arms: &[ReplicationArm]) -> ErrorSinkHandle {
        // subscribe now, before the task gets scheduled
        let mut errors = futures::stream::select_all(arms.iter().map(ReplicationArm::errors));
        let delay = self.delay;
        let reporter = Arc::clone(&self.reporter);
        let arm_count = arms.len();

        let handle = tokio::spawn(
            async move {
                debug!(arms = arm_count, delay_ms = delay.as_millis() as u64, "Error sink attached");
                let mut pending = JoinSet::new();
                loop {
                    tokio::select! {
                        report = errors.next() => match report {
                            Some(report) => {
                                let direction = report.direction.to_string();
                                metrics::record_replication_error(&direction);
                                debug!(%direction, "Replication error queued");
                                let reporter = Arc::clone(&reporter);
                                pending.spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    reporter.report(&report);
                                    metrics::record_replication_error_reported(&direction);
                                });
                            }
                            None => break,
                        },
                        Some(_) = pending.join_next() => {}
                    }
                }
                while pending.join_next().await.is_some() {}
                debug!("Error sink finished");
            }
            .instrument(info_span!("error_sink")),
        );

        ErrorSinkHandle { handle }
    }
}

/// Keeps an attached [`ErrorSink`] running.
#[derive(Debug)]
pub struct ErrorSinkHandle {
    handle: JoinHandle<()>,
}

impl ErrorSinkHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) {}
}

impl Drop for ErrorSinkHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
