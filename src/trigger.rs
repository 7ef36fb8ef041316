// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Trigger aggregation: many noisy sources in, one debounced tick stream out.
//!
//! # Architecture
//!
//! ```text
//!  ChangeFeedSource ──┐
//!  ArmLifecycle(up) ──┤  pump task     unbounded      debounce task     cap-1
//!  ArmLifecycle(down)─┼─(per source)──► activity ───► quiet window ────► ticks
//!  HeartbeatTicker ───┘                                (Initial first)
//! ```
//!
//! Each source runs in its own pump task. A source that errors or ends is
//! handled by [`SourcePolicy`] inside its pump; the other pumps and the
//! debounce task never see it.
//!
//! The tick channel holds one tick. If the consumer has not taken it yet, later
//! ticks are coalesced into it.

use crate::metrics;
use crate::replication::ReplicationArm;
use crate::resilience::RetryConfig;
use crate::store::StoreRef;
use crate::subscription::{Subscription, TaskGuard};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info_span, trace, warn, Instrument};

/// A "something may have changed" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Emitted once, immediately, on subscription.
    Initial,
    /// Emitted after a quiet period following source activity.
    Debounced,
}

impl Tick {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Debounced => "debounced",
        }
    }
}

/// What a pump does when its source errors or ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePolicy {
    /// Open the source again after a backoff delay.
    #[default]
    Resubscribe,
    /// Stop listening to that source. The rest keep going.
    Silence,
}

/// A trigger source reported a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("trigger source {origin} failed: {message}")]
pub struct SourceError {
    pub origin: String,
    pub message: String,
}

impl SourceError {
    pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Activity signals from one opening of a source.
pub type SourceStream = BoxStream<'static, std::result::Result<(), SourceError>>;

/// Something that can be opened (and re-opened) as a stream of activity signals.
pub trait TriggerSource: Send + Sync + 'static {
    /// Label used in logs and metrics.
    fn name(&self) -> String;

    /// Start listening. Each call returns a fresh stream.
    fn open(&self) -> SourceStream;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sources
// ═══════════════════════════════════════════════════════════════════════════════

/// Local mutation notifications from a store's change feed.
pub struct ChangeFeedSource {
    store: StoreRef,
}

impl ChangeFeedSource {
    pub fn new(store: StoreRef) -> Self {
        Self { store }
    }
}

impl TriggerSource for ChangeFeedSource {
    fn name(&self) -> String {
        format!("changes.{}", self.store.name())
    }

    fn open(&self) -> SourceStream {
        let name = self.name();
        self.store
            .watch_changes()
            .map(move |item| {
                item.map(|token| trace!(seq = token.seq(), "Change token"))
                    .map_err(|e| SourceError::new(name.clone(), e.to_string()))
            })
            .boxed()
    }
}

/// `Active` / `Paused` events of one replication arm.
pub struct ArmLifecycleSource {
    arm: ReplicationArm,
}

impl ArmLifecycleSource {
    pub fn new(arm: ReplicationArm) -> Self {
        Self { arm }
    }
}

impl TriggerSource for ArmLifecycleSource {
    fn name(&self) -> String {
        format!("replication.{}", self.arm.direction())
    }

    fn open(&self) -> SourceStream {
        self.arm.lifecycle().map(|_| Ok(())).boxed()
    }
}

/// Fixed-interval ticks. The first fires one period after `open`.
pub struct HeartbeatTicker {
    period: Duration,
}

impl HeartbeatTicker {
    pub fn new(period: Duration) -> Self {
        // interval() panics on a zero period
        Self {
            period: period.max(Duration::from_millis(1)),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl TriggerSource for HeartbeatTicker {
    fn name(&self) -> String {
        "heartbeat".to_string()
    }

    fn open(&self) -> SourceStream {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        IntervalStream::new(interval).map(|_| Ok(())).boxed()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Aggregator
// ═══════════════════════════════════════════════════════════════════════════════

/// Merges trigger sources into one debounced tick stream.
///
/// # Example
///
/// ```rust,no_run
/// use replica_monitor::trigger::{HeartbeatTicker, Tick, TriggerAggregator};
/// use std::time::Duration;
///
/// # async fn example() {
/// let mut ticks = TriggerAggregator::new(Duration::from_secs(1))
///     .with_source(HeartbeatTicker::new(Duration::from_secs(5)))
///     .subscribe();
/// assert_eq!(ticks.next().await, Some(Tick::Initial));
/// # }
/// ```
#[derive(Clone)]
pub struct TriggerAggregator {
    debounce: Duration,
    policy: SourcePolicy,
    retry: RetryConfig,
    sources: Vec<Arc<dyn TriggerSource>>,
}

impl TriggerAggregator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            policy: SourcePolicy::default(),
            retry: RetryConfig::daemon(),
            sources: Vec::new(),
        }
    }

    /// Set how terminated sources are handled.
    pub fn source_policy(mut self, policy: SourcePolicy, retry: RetryConfig) -> Self {
        self.policy = policy;
        self.retry = retry;
        self
    }

    pub fn with_source(mut self, source: impl TriggerSource) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Start all sources and return the tick stream.
    ///
    /// Must be called within a tokio runtime.
    pub fn subscribe(&self) -> Subscription<Tick> {
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::channel(1);
        let mut tasks = TaskGuard::new();

        for source in &self.sources {
            let span = info_span!("trigger_source", source = %source.name());
            tasks.push(tokio::spawn(
                pump_source(
                    Arc::clone(source),
                    activity_tx.clone(),
                    self.policy,
                    self.retry.clone(),
                )
                .instrument(span),
            ));
        }
        drop(activity_tx);

        debug!(
            sources = ?self.source_names(),
            debounce_ms = self.debounce.as_millis() as u64,
            "Trigger aggregator subscribed"
        );
        tasks.push(tokio::spawn(
            debounce_loop(activity_rx, tick_tx, self.debounce).instrument(info_span!("debounce")),
        ));

        Subscription::new(tick_rx, tasks)
    }
}

/// Forward one source's activity, applying the termination policy.
async fn pump_source(
    source: Arc<dyn TriggerSource>,
    activity: mpsc::UnboundedSender<()>,
    policy: SourcePolicy,
    retry: RetryConfig,
) {
    let name = source.name();
    let mut attempt = 0usize;

    loop {
        let mut stream = source.open();
        let reason = loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(())) => {
                        attempt = 0;
                        metrics::record_source_activity(&name);
                        if activity.send(()).is_err() {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Trigger source failed");
                        break "error";
                    }
                    None => break "ended",
                },
                _ = activity.closed() => return,
            }
        };
        drop(stream);
        metrics::record_source_terminated(&name, reason);

        match policy {
            SourcePolicy::Silence => {
                warn!(reason, "Trigger source terminated, no longer listening");
                return;
            }
            SourcePolicy::Resubscribe => {
                if retry.exhausted(attempt) {
                    warn!(reason, attempts = attempt, "Trigger source gave up after retries");
                    return;
                }
                attempt += 1;
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Trigger source terminated, resubscribing"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = activity.closed() => return,
                }
                metrics::record_source_resubscribed(&name);
            }
        }
    }
}

/// Emit `Initial`, then one `Debounced` tick per quiet window after activity.
async fn debounce_loop(
    mut activity: mpsc::UnboundedReceiver<()>,
    ticks: mpsc::Sender<Tick>,
    window: Duration,
) {
    if !deliver(&ticks, Tick::Initial) {
        return;
    }

    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            signal = activity.recv() => match signal {
                Some(()) => deadline = Some(Instant::now() + window),
                None => {
                    // every source is gone; flush what is pending
                    if let Some(at) = deadline {
                        tokio::time::sleep_until(at).await;
                        deliver(&ticks, Tick::Debounced);
                    }
                    debug!("All trigger sources terminated");
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if !deliver(&ticks, Tick::Debounced) {
                    break;
                }
            }
            _ = ticks.closed() => break,
        }
    }
}

/// Returns false once the consumer is gone.
fn deliver(ticks: &mpsc::Sender<Tick>, tick: Tick) -> bool {
    match ticks.try_send(tick) {
        Ok(()) => {
            trace!(kind = tick.kind(), "Tick");
            metrics::record_trigger_tick(tick.kind());
            true
        }
        Err(TrySendError::Full(_)) => {
            trace!(kind = tick.kind(), "Tick coalesced");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Split one tick stream in two. Each side coalesces on its own.
///
/// The splitter task belongs to the first subscription; dropping it ends the second.
pub(crate) fn fan_out(ticks: Subscription<Tick>) -> (Subscription<Tick>, Subscription<Tick>) {
    let (first_tx, first_rx) = mpsc::channel(1);
    let (second_tx, second_rx) = mpsc::channel(1);
    let mut tasks = TaskGuard::new();
    tasks.push(tokio::spawn(async move {
        let mut ticks = ticks;
        loop {
            tokio::select! {
                tick = ticks.next() => match tick {
                    Some(tick) => {
                        let first_open = forward(&first_tx, tick);
                        let second_open = forward(&second_tx, tick);
                        if !first_open && !second_open {
                            break;
                        }
                    }
                    None => break,
                },
                _ = async { tokio::join!(first_tx.closed(), second_tx.closed()) } => break,
            }
        }
    }));
    (
        Subscription::new(first_rx, tasks),
        Subscription::new(second_rx, TaskGuard::new()),
    )
}

fn forward(tx: &mpsc::Sender<Tick>, tick: Tick) -> bool {
    !matches!(tx.try_send(tick), Err(TrySendError::Closed(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;
    use tokio_stream::wrappers::BroadcastStream;

    /// Emits one activity signal per `pulse()`.
    #[derive(Clone)]
    struct PulseSource {
        tx: broadcast::Sender<()>,
    }

    impl PulseSource {
        fn new() -> Self {
            let (tx, _) = broadcast::channel(16);
            Self { tx }
        }

        fn pulse(&self) {
            let _ = self.tx.send(());
        }

        fn listeners(&self) -> usize {
            self.tx.receiver_count()
        }
    }

    impl TriggerSource for PulseSource {
        fn name(&self) -> String {
            "pulse".into()
        }

        fn open(&self) -> SourceStream {
            BroadcastStream::new(self.tx.subscribe()).map(|_| Ok(())).boxed()
        }
    }

    /// Ends immediately, counting how often it was opened.
    #[derive(Clone, Default)]
    struct EndingSource {
        opens: Arc<AtomicUsize>,
        fail: bool,
    }

    impl TriggerSource for EndingSource {
        fn name(&self) -> String {
            "ending".into()
        }

        fn open(&self) -> SourceStream {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                futures::stream::iter(vec![Err(SourceError::new("ending", "boom"))]).boxed()
            } else {
                futures::stream::empty().boxed()
            }
        }
    }

    async fn assert_quiet(ticks: &mut Subscription<Tick>, for_how_long: Duration) {
        let got = tokio::time::timeout(for_how_long, ticks.next()).await;
        assert!(got.is_err(), "unexpected tick: {:?}", got);
    }

    #[test]
    fn test_tick_kind() {
        assert_eq!(Tick::Initial.kind(), "initial");
        assert_eq!(Tick::Debounced.kind(), "debounced");
    }

    #[test]
    fn test_source_policy_default_and_serde() {
        assert_eq!(SourcePolicy::default(), SourcePolicy::Resubscribe);
        let parsed: SourcePolicy = serde_json::from_str("\"silence\"").unwrap();
        assert_eq!(parsed, SourcePolicy::Silence);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_tick_on_subscribe() {
        let mut ticks = TriggerAggregator::new(Duration::from_secs(1)).subscribe();
        assert_eq!(ticks.next().await, Some(Tick::Initial));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_within_window_gives_one_tick() {
        let pulse = PulseSource::new();
        let mut ticks = TriggerAggregator::new(Duration::from_secs(1))
            .with_source(pulse.clone())
            .subscribe();
        assert_eq!(ticks.next().await, Some(Tick::Initial));
        tokio::task::yield_now().await;

        for _ in 0..5 {
            pulse.pulse();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(ticks.next().await, Some(Tick::Debounced));
        assert_quiet(&mut ticks, Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_events_give_one_tick_each() {
        let pulse = PulseSource::new();
        let mut ticks = TriggerAggregator::new(Duration::from_secs(1))
            .with_source(pulse.clone())
            .subscribe();
        assert_eq!(ticks.next().await, Some(Tick::Initial));
        tokio::task::yield_now().await;

        for _ in 0..3 {
            pulse.pulse();
            assert_eq!(ticks.next().await, Some(Tick::Debounced));
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_quiet(&mut ticks, Duration::from_secs(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_first_fires_after_one_period() {
        let start = Instant::now();
        let mut ticks = TriggerAggregator::new(Duration::from_secs(1))
            .with_source(HeartbeatTicker::new(Duration::from_secs(5)))
            .subscribe();
        assert_eq!(ticks.next().await, Some(Tick::Initial));
        assert_eq!(ticks.next().await, Some(Tick::Debounced));

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(6), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(6100), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_consumer_sees_coalesced_ticks() {
        let pulse = PulseSource::new();
        let mut ticks = TriggerAggregator::new(Duration::from_millis(100))
            .with_source(pulse.clone())
            .subscribe();
        tokio::task::yield_now().await;

        for _ in 0..3 {
            pulse.pulse();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        assert_eq!(ticks.try_next(), Some(Tick::Initial));
        assert_eq!(ticks.try_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silenced_source_does_not_stop_others() {
        let ending = EndingSource {
            fail: true,
            ..Default::default()
        };
        let pulse = PulseSource::new();
        let mut ticks = TriggerAggregator::new(Duration::from_secs(1))
            .source_policy(SourcePolicy::Silence, RetryConfig::testing())
            .with_source(ending.clone())
            .with_source(pulse.clone())
            .subscribe();
        assert_eq!(ticks.next().await, Some(Tick::Initial));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ending.opens.load(Ordering::SeqCst), 1);

        pulse.pulse();
        assert_eq!(ticks.next().await, Some(Tick::Debounced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_until_retries_exhausted() {
        let ending = EndingSource::default();
        let mut ticks = TriggerAggregator::new(Duration::from_secs(1))
            .source_policy(SourcePolicy::Resubscribe, RetryConfig::testing())
            .with_source(ending.clone())
            .with_source(HeartbeatTicker::new(Duration::from_secs(5)))
            .subscribe();
        assert_eq!(ticks.next().await, Some(Tick::Initial));
        tokio::time::sleep(Duration::from_secs(2)).await;

        // first open plus three retries
        assert_eq!(ending.opens.load(Ordering::SeqCst), 4);
        assert_eq!(ticks.next().await, Some(Tick::Debounced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_tears_down_sources() {
        let pulse = PulseSource::new();
        let mut ticks = TriggerAggregator::new(Duration::from_secs(1))
            .with_source(pulse.clone())
            .subscribe();
        assert_eq!(ticks.next().await, Some(Tick::Initial));
        tokio::task::yield_now().await;
        assert_eq!(pulse.listeners(), 1);

        drop(ticks);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(pulse.listeners(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_out_feeds_both_sides() {
        let pulse = PulseSource::new();
        let ticks = TriggerAggregator::new(Duration::from_secs(1))
            .with_source(pulse.clone())
            .subscribe();
        let (mut first, mut second) = fan_out(ticks);
        assert_eq!(first.next().await, Some(Tick::Initial));
        assert_eq!(second.next().await, Some(Tick::Initial));
        tokio::task::yield_now().await;

        pulse.pulse();
        assert_eq!(first.next().await, Some(Tick::Debounced));
        assert_eq!(second.next().await, Some(Tick::Debounced));

        drop(first);
        assert_eq!(second.next().await, None);
    }

    #[test]
    fn test_zero_heartbeat_is_clamped() {
        assert_eq!(HeartbeatTicker::new(Duration::ZERO).period(), Duration::from_millis(1));
    }
}
