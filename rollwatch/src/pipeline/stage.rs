//! Stage task loops.
//!
//! A pipeline runs one task per stage. The root is a header reader that
//! polls the chain source and owns reorg handling; every other stage
//! consumes its upstream channel, runs a register extractor with retry and
//! backoff, and forwards typed items downstream. Sending into a full
//! bounded channel suspends the stage; that is the backpressure contract.

use super::event::{CloseReason, PipelineEvent};
use super::subscribers::SubscriberHub;
use crate::cancellation::CancelToken;
use crate::chain::{timed, ChainSource, Header};
use crate::core::RegisterKind;
use crate::errors::{Error, Result};
use crate::observability::Metrics;
use crate::registers::{extract, Extraction, PipelineData};
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Knobs shared by every stage of one pipeline.
#[derive(Debug, Clone)]
pub(crate) struct StageSettings {
    /// How often readers poll and `NotReady` extractions retry.
    pub pull_interval: Duration,
    /// Per chain-call deadline.
    pub call_timeout: Duration,
    /// Transient failures tolerated before the pipeline crashes.
    pub retry_budget: u32,
    /// First retry delay.
    pub backoff_base: Duration,
    /// Retry delay ceiling.
    pub backoff_cap: Duration,
    /// Deepest reorg handled before giving up.
    pub max_reorg_depth: u64,
}

/// Exponential backoff with +/-20% jitter.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub(crate) const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (1-based).
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.cap);
        let millis = u64::try_from(capped.as_millis()).unwrap_or(u64::MAX);
        let spread = millis / 5;
        let jittered =
            rand::thread_rng().gen_range(millis.saturating_sub(spread)..=millis + spread);
        Duration::from_millis(jittered)
    }
}

/// Where a stage sends its output: the next stage, or the subscriber hub.
pub(crate) enum Outlet {
    /// Bounded channel to the downstream stage.
    Channel(mpsc::Sender<PipelineEvent>),
    /// Fan-out to subscribers.
    Hub(Arc<SubscriberHub>),
}

impl Outlet {
    /// Delivers one frame; returns false once the downstream is gone.
    async fn send(&self, event: PipelineEvent) -> bool {
        match self {
            Self::Channel(tx) => tx.send(event).await.is_ok(),
            Self::Hub(hub) => {
                hub.deliver(event).await;
                true
            }
        }
    }
}

/// Sleeps unless cancelled first; returns false on cancellation.
async fn sleep_cancellable(cancel: &CancelToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

async fn crash(outlet: &Outlet, metrics: &Metrics, reason: String) {
    error!(%reason, "pipeline crashed");
    metrics.record_pipeline_crashed();
    let _ = outlet
        .send(PipelineEvent::Closed(CloseReason::Crashed(reason)))
        .await;
}

/// Fetches one header, retrying transient failures.
///
/// `Ok(None)` means the height is not available yet (or the stage was
/// cancelled mid-retry); the caller tries again at its next tick.
async fn fetch_header(
    source: &dyn ChainSource,
    number: u64,
    settings: &StageSettings,
    cancel: &CancelToken,
) -> Result<Option<Header>> {
    let backoff = Backoff::new(settings.backoff_base, settings.backoff_cap);
    let mut attempts = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        match timed(settings.call_timeout, source.header_by_number(number)).await {
            Ok(header) => return Ok(Some(header)),
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) if e.is_retryable() && attempts < settings.retry_budget => {
                attempts += 1;
                warn!(%number, error = %e, attempt = attempts, "header fetch failed, backing off");
                if !sleep_cancellable(cancel, backoff.delay(attempts)).await {
                    return Ok(None);
                }
            }
            Err(e) => {
                return Err(Error::PipelineFatal(format!(
                    "header fetch at {number}: {e}"
                )))
            }
        }
    }
}

fn push_ring(ring: &mut VecDeque<Header>, cap: usize, header: Header) {
    ring.push_back(header);
    while ring.len() > cap {
        ring.pop_front();
    }
}

/// Emits headers `from..=to`, extending the ring.
///
/// Returns `Ok(false)` when the downstream is gone; `Ok(true)` otherwise,
/// including partial progress when a height is not available yet.
async fn replay_range(
    source: &dyn ChainSource,
    ring: &mut VecDeque<Header>,
    ring_cap: usize,
    from: u64,
    to: u64,
    outlet: &Outlet,
    settings: &StageSettings,
    cancel: &CancelToken,
) -> Result<bool> {
    for number in from..=to {
        let Some(header) = fetch_header(source, number, settings, cancel).await? else {
            return Ok(true);
        };
        push_ring(ring, ring_cap, header.clone());
        if !outlet
            .send(PipelineEvent::Item(PipelineData::Header(header)))
            .await
        {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Walks back to the common ancestor, emits `Rewind`, and replays.
async fn rewind(
    source: &dyn ChainSource,
    ring: &mut VecDeque<Header>,
    ring_cap: usize,
    head_number: u64,
    outlet: &Outlet,
    settings: &StageSettings,
    cancel: &CancelToken,
    metrics: &Metrics,
) -> Result<bool> {
    let mut walked = 0u64;
    let ancestor = loop {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let Some(candidate) = ring.back().cloned() else {
            return Err(Error::ReorgTooDeep {
                max_depth: settings.max_reorg_depth,
                walked,
            });
        };
        if candidate.number <= head_number {
            if let Some(remote) = fetch_header(source, candidate.number, settings, cancel).await? {
                if remote.hash == candidate.hash {
                    break candidate;
                }
            }
        }
        ring.pop_back();
        walked += 1;
        if walked > settings.max_reorg_depth {
            return Err(Error::ReorgTooDeep {
                max_depth: settings.max_reorg_depth,
                walked,
            });
        }
    };

    metrics.record_reorg_handled();
    warn!(
        ancestor = ancestor.number,
        head = head_number,
        walked, "reorg detected, rewinding"
    );
    if !outlet.send(PipelineEvent::Rewind(ancestor.number + 1)).await {
        return Ok(false);
    }
    replay_range(
        source,
        ring,
        ring_cap,
        ancestor.number + 1,
        head_number,
        outlet,
        settings,
        cancel,
    )
    .await
}

/// Processes one observed head: first catch-up, forward emits, or reorg.
#[allow(clippy::too_many_arguments)]
async fn advance(
    source: &dyn ChainSource,
    ring: &mut VecDeque<Header>,
    ring_cap: usize,
    head: Header,
    start: Option<u64>,
    outlet: &Outlet,
    settings: &StageSettings,
    cancel: &CancelToken,
    metrics: &Metrics,
) -> Result<bool> {
    // First observation: emit from the configured start (or the head).
    let Some(last) = ring.back().cloned() else {
        let first = start.unwrap_or(head.number);
        if first > head.number {
            return Ok(true); // configured start not reached yet
        }
        return replay_range(
            source, ring, ring_cap, first, head.number, outlet, settings, cancel,
        )
        .await;
    };

    if head.number == last.number && head.hash == last.hash {
        return Ok(true);
    }

    if head.number > last.number {
        // Catch up one header at a time; the parent check catches both
        // gaps and reorgs that land mid-poll.
        let mut cursor = last;
        for number in (cursor.number + 1)..=head.number {
            let Some(header) = fetch_header(source, number, settings, cancel).await? else {
                return Ok(true);
            };
            if header.parent_hash != cursor.hash {
                return rewind(
                    source, ring, ring_cap, head.number, outlet, settings, cancel, metrics,
                )
                .await;
            }
            push_ring(ring, ring_cap, header.clone());
            if !outlet
                .send(PipelineEvent::Item(PipelineData::Header(header.clone())))
                .await
            {
                return Ok(false);
            }
            cursor = header;
        }
        return Ok(true);
    }

    // The head moved sideways or backwards: a reorg shortened the chain.
    rewind(
        source, ring, ring_cap, head.number, outlet, settings, cancel, metrics,
    )
    .await
}

/// Live header reader: polls the head at the pull interval, handles
/// reorgs, and forwards canonical headers in order.
pub(crate) async fn run_live_reader(
    source: Arc<dyn ChainSource>,
    start: Option<u64>,
    outlet: Outlet,
    settings: StageSettings,
    cancel: Arc<CancelToken>,
    metrics: Arc<Metrics>,
) {
    let backoff = Backoff::new(settings.backoff_base, settings.backoff_cap);
    let ring_cap = usize::try_from(settings.max_reorg_depth)
        .unwrap_or(usize::MAX)
        .saturating_add(1);
    let mut ring: VecDeque<Header> = VecDeque::new();
    let mut failures = 0u32;

    loop {
        if !sleep_cancellable(&cancel, settings.pull_interval).await {
            return;
        }
        let head = match timed(settings.call_timeout, source.header_head()).await {
            Ok(head) => {
                failures = 0;
                head
            }
            Err(e) if e.is_retryable() && failures < settings.retry_budget => {
                failures += 1;
                warn!(error = %e, attempt = failures, "head poll failed, backing off");
                if !sleep_cancellable(&cancel, backoff.delay(failures)).await {
                    return;
                }
                continue;
            }
            Err(e) => {
                crash(&outlet, &metrics, format!("head poll: {e}")).await;
                return;
            }
        };

        match advance(
            &*source, &mut ring, ring_cap, head, start, &outlet, &settings, &cancel, &metrics,
        )
        .await
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                crash(&outlet, &metrics, e.to_string()).await;
                return;
            }
        }
    }
}

/// Backtest header reader: emits `start..=end` in order, then completes.
pub(crate) async fn run_backtest_reader(
    source: Arc<dyn ChainSource>,
    start: u64,
    end: u64,
    outlet: Outlet,
    settings: StageSettings,
    cancel: Arc<CancelToken>,
    metrics: Arc<Metrics>,
) {
    for number in start..=end {
        let header = match fetch_header(&*source, number, &settings, &cancel).await {
            Ok(Some(header)) => header,
            Ok(None) => {
                // Not available yet (or cancelled); wait for the chain.
                if !sleep_cancellable(&cancel, settings.pull_interval).await {
                    return;
                }
                continue;
            }
            Err(e) => {
                crash(&outlet, &metrics, e.to_string()).await;
                return;
            }
        };
        if !outlet
            .send(PipelineEvent::Item(PipelineData::Header(header)))
            .await
        {
            return;
        }
    }
    let _ = outlet
        .send(PipelineEvent::Closed(CloseReason::Completed))
        .await;
}

/// Extractor stage: consumes upstream headers, runs the register
/// extractor with retry, and forwards typed items.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_extract_stage(
    kind: RegisterKind,
    params: Map<String, Value>,
    source: Arc<dyn ChainSource>,
    mut rx: mpsc::Receiver<PipelineEvent>,
    outlet: Outlet,
    settings: StageSettings,
    cancel: Arc<CancelToken>,
    metrics: Arc<Metrics>,
) {
    let backoff = Backoff::new(settings.backoff_base, settings.backoff_cap);
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        match event {
            PipelineEvent::Item(PipelineData::Header(header)) => {
                let mut attempts = 0u32;
                loop {
                    if cancel.is_cancelled() {
                        return;
                    }
                    match timed(
                        settings.call_timeout,
                        extract(kind, &*source, &header, &params),
                    )
                    .await
                    {
                        Ok(Extraction::Out(items)) => {
                            for item in items {
                                if !outlet.send(PipelineEvent::Item(item)).await {
                                    return;
                                }
                            }
                            break;
                        }
                        Ok(Extraction::NotReady) => {
                            debug!(register = %kind, height = header.number, "not ready, retrying next tick");
                            if !sleep_cancellable(&cancel, settings.pull_interval).await {
                                return;
                            }
                        }
                        Err(e) if e.is_retryable() && attempts < settings.retry_budget => {
                            attempts += 1;
                            warn!(register = %kind, height = header.number, error = %e, attempt = attempts, "extractor failed, backing off");
                            if !sleep_cancellable(&cancel, backoff.delay(attempts)).await {
                                return;
                            }
                        }
                        Err(e) => {
                            crash(
                                &outlet,
                                &metrics,
                                format!("{kind} extractor at {}: {e}", header.number),
                            )
                            .await;
                            return;
                        }
                    }
                }
            }
            PipelineEvent::Item(other) => {
                warn!(register = %kind, data = %other.kind(), "unexpected upstream item");
            }
            PipelineEvent::Rewind(height) => {
                if !outlet.send(PipelineEvent::Rewind(height)).await {
                    return;
                }
            }
            PipelineEvent::Closed(reason) => {
                let _ = outlet.send(PipelineEvent::Closed(reason)).await;
                return;
            }
        }
    }
}
