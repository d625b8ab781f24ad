//! Severity-routed alert dispatch.
//!
//! The router owns a severity-to-sinks table and a queue of activations.
//! Each activation is rendered once and dispatched to every destination
//! concurrently; each dispatch retries transient failures on its own and
//! can never block other destinations or later alerts.

use super::sink::{Alert, AlertSink, SinkStatus};
use crate::cancellation::{CancelToken, TaskGroup};
use crate::core::{Activation, SessionId, Severity};
use crate::errors::{Error, Result};
use crate::observability::Metrics;
use crate::pipeline::Backoff;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Maps severities to sink names.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<Severity, Vec<String>>,
}

impl Default for RoutingTable {
    /// The stock routing: everything to Slack, medium and high also page.
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert(Severity::Low, vec!["slack".to_string()]);
        routes.insert(
            Severity::Medium,
            vec!["slack".to_string(), "pagerduty_low".to_string()],
        );
        routes.insert(
            Severity::High,
            vec!["slack".to_string(), "pagerduty_high".to_string()],
        );
        Self { routes }
    }
}

impl RoutingTable {
    /// Replaces the destinations of one severity.
    pub fn set(&mut self, severity: Severity, destinations: Vec<String>) {
        self.routes.insert(severity, destinations);
    }

    /// The destinations of one severity.
    #[must_use]
    pub fn destinations(&self, severity: Severity) -> Vec<String> {
        self.routes.get(&severity).cloned().unwrap_or_default()
    }
}

/// Dispatch tunables.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Queue depth between engines and the router.
    pub queue_depth: usize,
    /// Attempts per destination.
    pub dispatch_attempts: u32,
    /// Deadline per delivery attempt.
    pub dispatch_timeout: Duration,
    /// First retry delay.
    pub backoff_base: Duration,
    /// Retry delay ceiling.
    pub backoff_cap: Duration,
    /// Drain window on shutdown.
    pub drain_grace: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            queue_depth: 256,
            dispatch_attempts: 3,
            dispatch_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(5),
            drain_grace: Duration::from_secs(10),
        }
    }
}

struct RouterShared {
    sinks: RwLock<HashMap<String, Arc<dyn AlertSink>>>,
    table: RwLock<RoutingTable>,
    overrides: DashMap<SessionId, HashMap<String, bool>>,
    settings: RouterSettings,
    metrics: Arc<Metrics>,
}

impl RouterShared {
    /// Destinations for one activation, applying the session override on
    /// top of the table at dispatch time.
    fn destinations_for(&self, severity: Severity, session: SessionId) -> Vec<String> {
        let mut destinations = self.table.read().destinations(severity);
        if let Some(overrides) = self.overrides.get(&session) {
            for (name, enabled) in overrides.iter() {
                if *enabled {
                    if !destinations.contains(name) {
                        destinations.push(name.clone());
                    }
                } else {
                    destinations.retain(|d| d != name);
                }
            }
        }
        destinations
    }
}

fn render(activation: &Activation) -> Alert {
    let context = serde_json::to_string(&activation.context).unwrap_or_default();
    let body = format!(
        "heuristic {kind} triggered\n\
         session: {session}\n\
         severity: {severity}\n\
         block: {height} ({hash})\n\
         message: {message}\n\
         {detail}\n\
         context: {context}",
        kind = activation.heuristic,
        session = activation.session,
        severity = activation.severity,
        height = activation.block_height,
        hash = activation.block_hash,
        message = activation.message,
        detail = activation.detail,
    );
    Alert {
        severity: activation.severity,
        title: format!(
            "rollwatch {}: {}",
            activation.heuristic, activation.message
        ),
        body,
        context: activation.context.clone(),
    }
}

async fn dispatch(
    sink: Arc<dyn AlertSink>,
    alert: Arc<Alert>,
    settings: RouterSettings,
    metrics: Arc<Metrics>,
) {
    let backoff = Backoff::new(settings.backoff_base, settings.backoff_cap);
    for attempt in 1..=settings.dispatch_attempts {
        let outcome = tokio::time::timeout(settings.dispatch_timeout, sink.send(&alert)).await;
        match outcome {
            Ok(SinkStatus::Ok) => {
                metrics.record_alert_dispatched();
                return;
            }
            Ok(SinkStatus::Permanent(reason)) => {
                error!(sink = sink.name(), %reason, "alert delivery failed permanently");
                metrics.record_alert_failed();
                return;
            }
            Ok(SinkStatus::Transient(reason)) => {
                debug!(sink = sink.name(), %reason, attempt, "alert delivery hiccup");
            }
            Err(_) => {
                debug!(sink = sink.name(), attempt, "alert delivery timed out");
            }
        }
        if attempt < settings.dispatch_attempts {
            tokio::time::sleep(backoff.delay(attempt)).await;
        }
    }
    error!(sink = sink.name(), "alert delivery exhausted its attempts");
    metrics.record_alert_failed();
}

async fn run_router(
    shared: Arc<RouterShared>,
    mut rx: mpsc::Receiver<Activation>,
    cancel: Arc<CancelToken>,
) {
    let mut inflight: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            activation = rx.recv() => {
                let Some(activation) = activation else { break };
                let alert = Arc::new(render(&activation));
                let destinations =
                    shared.destinations_for(activation.severity, activation.session);
                for name in destinations {
                    let Some(sink) = shared.sinks.read().get(&name).cloned() else {
                        debug!(sink = %name, "destination not configured, skipping");
                        continue;
                    };
                    inflight.spawn(dispatch(
                        sink,
                        alert.clone(),
                        shared.settings.clone(),
                        shared.metrics.clone(),
                    ));
                }
            }
            Some(_) = inflight.join_next(), if !inflight.is_empty() => {}
        }
    }

    // Let in-flight deliveries finish inside the drain window.
    let deadline = tokio::time::Instant::now() + shared.settings.drain_grace;
    while !inflight.is_empty() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            inflight.abort_all();
            break;
        }
        if tokio::time::timeout(remaining, inflight.join_next())
            .await
            .is_err()
        {
            inflight.abort_all();
            break;
        }
    }
}

/// Routes activations to alert sinks by severity.
pub struct AlertRouter {
    shared: Arc<RouterShared>,
    tx: mpsc::Sender<Activation>,
    worker: TaskGroup,
}

impl AlertRouter {
    /// Creates the router and starts its dispatch worker.
    #[must_use]
    pub fn new(
        settings: RouterSettings,
        metrics: Arc<Metrics>,
        parent: &Arc<CancelToken>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_depth);
        let shared = Arc::new(RouterShared {
            sinks: RwLock::new(HashMap::new()),
            table: RwLock::new(RoutingTable::default()),
            overrides: DashMap::new(),
            settings,
            metrics,
        });

        let worker = TaskGroup::new(parent);
        let worker_shared = shared.clone();
        worker.spawn("alert_router", move |cancel| {
            run_router(worker_shared, rx, cancel)
        });

        Self { shared, tx, worker }
    }

    /// Registers a destination under its routing name.
    pub fn register_sink(&self, sink: Arc<dyn AlertSink>) {
        let name = sink.name().to_string();
        info!(sink = %name, "alert sink registered");
        self.shared.sinks.write().insert(name, sink);
    }

    /// Replaces the destinations of one severity.
    pub fn set_route(&self, severity: Severity, destinations: Vec<String>) {
        self.shared.table.write().set(severity, destinations);
    }

    /// Installs a session's destination overrides.
    pub fn register_session(&self, session: SessionId, overrides: Option<HashMap<String, bool>>) {
        if let Some(overrides) = overrides {
            self.shared.overrides.insert(session, overrides);
        }
    }

    /// Drops a session's overrides.
    pub fn deregister_session(&self, session: SessionId) {
        self.shared.overrides.remove(&session);
    }

    /// Queues one activation for dispatch.
    pub async fn submit(&self, activation: Activation) -> Result<()> {
        self.tx
            .send(activation)
            .await
            .map_err(|_| Error::Shutdown)
    }

    /// Stops accepting activations and drains in-flight dispatches.
    pub async fn shutdown(&self) {
        let grace = self.shared.settings.drain_grace;
        self.worker.shutdown("alert router shutdown", grace).await;
    }
}

impl std::fmt::Debug for AlertRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertRouter")
            .field("sinks", &self.shared.sinks.read().len())
            .finish_non_exhaustive()
    }
}
