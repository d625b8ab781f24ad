//! Per-session evaluator workers.
//!
//! An engine binds one session to one pipeline subscription, runs the
//! heuristic over every item, and hands stamped activations to the alert
//! router. It owns the session's cool-down state and the replay dedup set
//! that keeps a rewind from re-alerting facts already reported.

use crate::alerts::AlertRouter;
use crate::cancellation::CancelToken;
use crate::core::{
    Activation, AlertPolicy, HeuristicKind, SessionId, SessionState, Trigger,
};
use crate::heuristics::{EvalContext, Heuristic};
use crate::observability::Metrics;
use crate::pipeline::{CloseReason, PipelineEvent, Subscription};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Replay keys older than this many blocks below the current height are
/// pruned; a rewind can only reach back the reorg bound, which is far
/// smaller.
const SEEN_RETENTION_BLOCKS: u64 = 128;

/// Identity and policy of the session an engine evaluates for.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// The owning session.
    pub session: SessionId,
    /// The session's heuristic kind.
    pub kind: HeuristicKind,
    /// The session's alert policy.
    pub policy: AlertPolicy,
}

/// Shared session record the engine keeps current.
#[derive(Debug)]
pub struct SessionCell {
    state: RwLock<SessionState>,
    last_alert_at: RwLock<Option<DateTime<Utc>>>,
}

impl SessionCell {
    /// Creates a cell in the given initial state.
    #[must_use]
    pub fn new(initial: SessionState) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(initial),
            last_alert_at: RwLock::new(None),
        })
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Transitions the session state.
    pub fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// When the session last alerted, if ever.
    #[must_use]
    pub fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        *self.last_alert_at.read()
    }

    fn record_alert(&self, at: DateTime<Utc>) {
        *self.last_alert_at.write() = Some(at);
    }
}

/// The engine loop. Runs until the subscription closes, the pipeline
/// terminates, or the token cancels.
#[allow(clippy::too_many_lines)]
pub async fn run_engine(
    config: EngineConfig,
    heuristic: Box<dyn Heuristic>,
    mut subscription: Subscription,
    router: Arc<AlertRouter>,
    ctx: EvalContext,
    cell: Arc<SessionCell>,
    metrics: Arc<Metrics>,
    cancel: Arc<CancelToken>,
) {
    let cool_down = chrono::Duration::seconds(
        i64::try_from(config.policy.cool_down_seconds).unwrap_or(i64::MAX),
    );
    // Replay dedup: key -> height, pruned as the pipeline advances.
    let mut seen: HashMap<String, u64> = HashMap::new();
    // Cool-down anchor: when the last alert fired and at which height.
    let mut last_alert: Option<(DateTime<Utc>, u64)> = None;

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = subscription.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            PipelineEvent::Item(data) => {
                let height = data.block_height();
                seen.retain(|_, at| *at + SEEN_RETENTION_BLOCKS >= height);

                let triggers: Vec<Trigger> = match heuristic.evaluate(&data, &ctx).await {
                    Ok(triggers) => triggers,
                    Err(e) => {
                        warn!(session = %config.session, error = %e, "heuristic evaluation failed");
                        metrics.record_heuristic_error();
                        continue;
                    }
                };

                for trigger in triggers {
                    let activation = Activation::stamp(
                        trigger,
                        config.session,
                        config.kind,
                        config.policy.severity,
                        config.policy.message.clone(),
                    );
                    let key = activation.dedup_key();
                    if seen.contains_key(&key) {
                        debug!(session = %config.session, %key, "suppressing replayed activation");
                        metrics.record_activation_suppressed();
                        continue;
                    }

                    let now = Utc::now();
                    if config.policy.cool_down_seconds > 0 {
                        if let Some((at, _)) = last_alert {
                            if now.signed_duration_since(at) < cool_down {
                                debug!(session = %config.session, "suppressing activation inside cool-down");
                                metrics.record_activation_suppressed();
                                continue;
                            }
                        }
                    }

                    if router.submit(activation).await.is_err() {
                        // The router is shutting down; so are we.
                        return;
                    }
                    seen.insert(key, height);
                    last_alert = Some((now, height));
                    cell.record_alert(now);
                    metrics.record_activation_emitted();
                }
            }

            PipelineEvent::Rewind(height) => {
                // Cool-down state tied to superseded heights is void; the
                // replay dedup set stays so re-emitted facts stay quiet.
                if last_alert.is_some_and(|(_, at)| at >= height) {
                    last_alert = None;
                }
                debug!(session = %config.session, %height, "pipeline rewound");
            }

            PipelineEvent::Closed(CloseReason::Completed) => {
                info!(session = %config.session, "backtest completed");
                cell.set_state(SessionState::Terminated);
                break;
            }

            PipelineEvent::Closed(CloseReason::Crashed(reason)) => {
                warn!(session = %config.session, %reason, "pipeline crashed, parking session");
                cell.set_state(SessionState::Paused);

                let meta = Activation::stamp(
                    Trigger::new(
                        format!("pipeline feeding session {} failed: {reason}", config.session),
                        0,
                        alloy_primitives::B256::ZERO,
                    )
                    .with_context("kind", json!("pipeline_fatal"))
                    .with_context("session", json!(config.session.to_string())),
                    config.session,
                    config.kind,
                    crate::core::Severity::High,
                    "pipeline_fatal",
                );
                let _ = router.submit(meta).await;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{CollectingAlertSink, RouterSettings};
    use crate::chain::{ChainSources, Header, MockChain};
    use crate::core::{
        ComponentId, ComponentRole, DataKind, Network, PipelineId, PipelineMode, PipelineState,
        Severity,
    };
    use crate::heuristics;
    use crate::pipeline::SubscriberHub;
    use crate::registers::{BalanceReading, PipelineData};
    use alloy_primitives::{Address, B256, U256};
    use serde_json::{json, Map};
    use std::time::Duration;

    const WATCHED: Address = Address::repeat_byte(0xaa);

    struct Harness {
        hub: Arc<SubscriberHub>,
        slack: Arc<CollectingAlertSink>,
        router: Arc<AlertRouter>,
        cell: Arc<SessionCell>,
        metrics: Arc<Metrics>,
        cancel: Arc<CancelToken>,
        engine: tokio::task::JoinHandle<()>,
    }

    fn balance_heuristic(lower: f64) -> Box<dyn Heuristic> {
        let mut params = Map::new();
        params.insert("address".into(), json!(format!("{WATCHED}")));
        params.insert("lower".into(), json!(lower));
        heuristics::build(crate::core::HeuristicKind::BalanceEnforcement, &params).unwrap()
    }

    fn spawn_engine(cool_down_seconds: u64) -> Harness {
        let cancel = CancelToken::new();
        let metrics = Arc::new(Metrics::new());

        let router = Arc::new(AlertRouter::new(
            RouterSettings {
                backoff_base: Duration::from_millis(5),
                drain_grace: Duration::from_secs(1),
                ..RouterSettings::default()
            },
            metrics.clone(),
            &cancel,
        ));
        let slack = Arc::new(CollectingAlertSink::new("slack"));
        router.register_sink(slack.clone());

        let pipeline = PipelineId::generate(Network::Layer2, PipelineMode::Live);
        let hub = SubscriberHub::new(pipeline, DataKind::Balance, 16);
        hub.set_state(PipelineState::Running);
        let subscription =
            hub.subscribe(ComponentId::generate(Network::Layer2, ComponentRole::Engine));

        let session = SessionId::generate(
            Network::Layer2,
            crate::core::HeuristicKind::BalanceEnforcement,
        );
        let cell = SessionCell::new(SessionState::Active);
        let chain = Arc::new(MockChain::new());

        let config = EngineConfig {
            session,
            kind: crate::core::HeuristicKind::BalanceEnforcement,
            policy: AlertPolicy::new(Severity::Medium, "one baby to another says:")
                .with_cool_down(cool_down_seconds),
        };

        let engine = tokio::spawn(run_engine(
            config,
            balance_heuristic(3.0),
            subscription,
            router.clone(),
            EvalContext::new(ChainSources::new(chain.clone(), chain)),
            cell.clone(),
            metrics.clone(),
            cancel.clone(),
        ));

        Harness {
            hub,
            slack,
            router,
            cell,
            metrics,
            cancel,
            engine,
        }
    }

    fn balance_item(height: u64, eth: u64) -> PipelineEvent {
        PipelineEvent::Item(PipelineData::Balance(BalanceReading {
            address: WATCHED,
            value: U256::from(eth) * U256::from(10u64).pow(U256::from(18u64)),
            block_height: height,
            block_hash: B256::repeat_byte(u8::try_from(height % 251).unwrap_or(0)),
        }))
    }

    async fn wait_for<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    async fn teardown(h: Harness) {
        h.cancel.cancel("test over");
        let _ = h.engine.await;
        h.router.shutdown().await;
    }

    #[tokio::test]
    async fn test_violation_reaches_sink_once_per_block() {
        let h = spawn_engine(0);

        h.hub.deliver(balance_item(5, 10)).await; // healthy
        h.hub.deliver(balance_item(6, 1)).await; // drained

        wait_for(|| h.slack.len() == 1).await;
        assert_eq!(h.slack.bodies_containing("balance_enforcement").len(), 1);
        assert_eq!(
            h.slack.bodies_containing("one baby to another says:").len(),
            1
        );
        assert!(h.cell.last_alert_at().is_some());

        // Refunded: no further alerts.
        h.hub.deliver(balance_item(7, 10)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.slack.len(), 1);

        teardown(h).await;
    }

    #[tokio::test]
    async fn test_cool_down_suppresses_repeat_alerts() {
        let h = spawn_engine(3600);

        h.hub.deliver(balance_item(5, 1)).await;
        h.hub.deliver(balance_item(6, 1)).await;
        h.hub.deliver(balance_item(7, 1)).await;

        wait_for(|| h.metrics.activations_suppressed() == 2).await;
        assert_eq!(h.metrics.activations_emitted(), 1);
        wait_for(|| h.slack.len() == 1).await;

        teardown(h).await;
    }

    #[tokio::test]
    async fn test_rewind_does_not_duplicate_alerts() {
        let h = spawn_engine(0);

        h.hub.deliver(balance_item(5, 1)).await;
        wait_for(|| h.slack.len() == 1).await;

        // The same violation replayed after a rewind stays quiet.
        h.hub.deliver(PipelineEvent::Rewind(5)).await;
        h.hub.deliver(balance_item(5, 1)).await;

        wait_for(|| h.metrics.activations_suppressed() == 1).await;
        assert_eq!(h.slack.len(), 1);

        teardown(h).await;
    }

    #[tokio::test]
    async fn test_crash_emits_meta_alert_and_parks_session() {
        let h = spawn_engine(0);

        h.hub
            .deliver(PipelineEvent::Closed(CloseReason::Crashed(
                "retry budget exhausted".into(),
            )))
            .await;

        wait_for(|| !h.slack.bodies_containing("pipeline_fatal").is_empty()).await;
        assert_eq!(h.cell.state(), SessionState::Paused);
        let meta = &h.slack.bodies_containing("pipeline_fatal")[0];
        assert_eq!(meta.severity, Severity::High);

        let _ = h.engine.await;
        h.router.shutdown().await;
        h.cancel.cancel("test over");
    }

    #[tokio::test]
    async fn test_backtest_completion_terminates_session() {
        let h = spawn_engine(0);

        h.hub
            .deliver(PipelineEvent::Closed(CloseReason::Completed))
            .await;

        wait_for(|| h.cell.state() == SessionState::Terminated).await;
        let _ = h.engine.await;
        h.router.shutdown().await;
        h.cancel.cancel("test over");
    }
}
