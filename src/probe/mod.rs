// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Probes: per-tick queries turned into live, deduplicated streams.
//!
//! A probe stream consumes a tick [`Subscription`] and runs one probe per
//! tick. Probes for different ticks may overlap:
//!
//! ```text
//! ticks:    T1 ──── T2 ─────────── T3
//! probes:   [ p1 ][────── p2 ──────]
//!                        [ p3 ]
//! output:   r1           r3        (r2 arrives after r3: stale, discarded)
//! ```
//!
//! Each result is tagged with its tick's sequence number. A result older than
//! one already resolved is dropped, so the stream only moves forward. Equal
//! consecutive values are suppressed.

pub mod snapshot;
pub mod sync_ratio;

pub use snapshot::{Snapshot, SnapshotFailurePolicy, SnapshotProbe, SnapshotResult, SnapshotSource};
pub use sync_ratio::{SyncRatio, SyncRatioProbe, SyncState};

use crate::metrics;
use crate::subscription::{Subscription, TaskGuard};
use crate::trigger::Tick;
use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info_span, trace, warn, Instrument};

/// Buffered results per probe stream.
const PROBE_CHANNEL_CAPACITY: usize = 16;

/// A value a probe stream can carry.
pub trait ProbeItem: Clone + PartialEq + Send + 'static {
    /// A terminal item is delivered and then the stream ends.
    fn is_terminal(&self) -> bool {
        false
    }
}

impl ProbeItem for SyncRatio {}

impl ProbeItem for SnapshotResult {
    fn is_terminal(&self) -> bool {
        self.is_err()
    }
}

/// Run `probe` on every tick and stream the results.
///
/// `probe` returning `None` means "nothing to report for this tick": the tick
/// still counts for staleness, but no value is delivered.
pub(crate) fn spawn_probe_stream<T, F, Fut>(
    ticks: Subscription<Tick>,
    label: &'static str,
    probe: F,
) -> Subscription<T>
where
    T: ProbeItem,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(PROBE_CHANNEL_CAPACITY);
    let mut tasks = TaskGuard::new();
    tasks.push(tokio::spawn(
        run_probe_stream(ticks, label, probe, tx).instrument(info_span!("probe", probe = label)),
    ));
    Subscription::new(rx, tasks)
}

async fn run_probe_stream<T, F, Fut>(
    mut ticks: Subscription<Tick>,
    label: &'static str,
    probe: F,
    tx: mpsc::Sender<T>,
) where
    T: ProbeItem,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<T>> + Send + 'static,
{
    let mut in_flight: JoinSet<(u64, Option<T>)> = JoinSet::new();
    let mut next_seq = 0u64;
    let mut resolved: Option<u64> = None;
    let mut last: Option<T> = None;
    let mut ticks_open = true;

    loop {
        if !ticks_open && in_flight.is_empty() {
            debug!("Tick stream ended, probe stream done");
            break;
        }

        tokio::select! {
            tick = ticks.next(), if ticks_open => match tick {
                Some(tick) => {
                    next_seq += 1;
                    let seq = next_seq;
                    trace!(seq, kind = tick.kind(), in_flight = in_flight.len(), "Probe started");
                    let run = probe();
                    in_flight.spawn(async move { (seq, run.await) });
                }
                None => ticks_open = false,
            },
            joined = in_flight.join_next(), if !in_flight.is_empty() => {
                let (seq, value) = match joined {
                    Some(Ok(result)) => result,
                    Some(Err(e)) => {
                        if e.is_panic() {
                            warn!(error = %e, "Probe task panicked");
                        }
                        continue;
                    }
                    None => continue,
                };

                if resolved.is_some_and(|newest| seq < newest) {
                    trace!(seq, "Stale probe result discarded");
                    metrics::record_stale_result(label);
                    continue;
                }
                resolved = Some(seq);

                let Some(value) = value else {
                    continue;
                };
                if last.as_ref() == Some(&value) {
                    trace!(seq, "Probe result unchanged");
                    continue;
                }

                let terminal = value.is_terminal();
                last = Some(value.clone());
                if tx.send(value).await.is_err() {
                    break;
                }
                if terminal {
                    debug!(seq, "Terminal probe result delivered, stream ends");
                    break;
                }
            }
            _ = tx.closed() => break,
        }
    }
}
