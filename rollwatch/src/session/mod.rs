//! Session lifecycle orchestration.
//!
//! The session manager is the write side of the whole service: it turns
//! registration requests into (pipeline, engine, alert-policy) triples,
//! owns the session records, and tears everything down in dependency
//! order on shutdown.


use crate::alerts::AlertRouter;
use crate::cancellation::CancelToken;
use crate::chain::ChainSources;
use crate::core::{
    AlertPolicy, ComponentId, ComponentRole, HeuristicKind, Network, PipelineId, PipelineMode,
    SessionId, SessionState,
};
use crate::engine::{run_engine, EngineConfig, SessionCell};
use crate::errors::{Error, Result};
use crate::etl::EtlManager;
use crate::heuristics::{self, EvalContext};
use crate::observability::Metrics;
use crate::pipeline::{PipelineConfig, PipelineSettings};
use crate::registers;
use crate::state::StateStore;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One registration request, as accepted by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Which chain to monitor.
    pub network: Network,
    /// Live or backtest driving.
    pub pipeline_type: PipelineMode,
    /// Which heuristic to run.
    pub heuristic_type: HeuristicKind,
    /// First height to read, if not the current head.
    #[serde(default)]
    pub start_height: Option<u64>,
    /// Last height to read; required for backtests.
    #[serde(default)]
    pub end_height: Option<u64>,
    /// Severity, message, cool-down, destination overrides.
    pub alerting_params: AlertPolicy,
    /// Heuristic-specific parameters, validated against the kind's schema.
    pub session_params: Map<String, Value>,
}

struct SessionRecord {
    pipeline: PipelineId,
    cell: Arc<SessionCell>,
    cancel: Arc<CancelToken>,
    engine: Mutex<Option<JoinHandle<()>>>,
}

/// Orchestrates sessions across the ETL manager, engines, and the router.
pub struct SessionManager {
    etl: Arc<EtlManager>,
    router: Arc<AlertRouter>,
    sources: ChainSources,
    store: Arc<dyn StateStore>,
    metrics: Arc<Metrics>,
    cancel: Arc<CancelToken>,
    sessions: DashMap<SessionId, SessionRecord>,
    call_timeout: Duration,
    drain_grace: Duration,
}

impl SessionManager {
    /// Wires the manager to its collaborators.
    #[must_use]
    pub fn new(
        etl: Arc<EtlManager>,
        router: Arc<AlertRouter>,
        sources: ChainSources,
        store: Arc<dyn StateStore>,
        settings: &PipelineSettings,
        metrics: Arc<Metrics>,
        parent: &Arc<CancelToken>,
    ) -> Arc<Self> {
        Arc::new(Self {
            etl,
            router,
            sources,
            store,
            metrics,
            cancel: parent.child(),
            sessions: DashMap::new(),
            call_timeout: settings.call_timeout,
            drain_grace: settings.drain_grace,
        })
    }

    /// Registers a batch of sessions; failures are per-request.
    pub async fn bootstrap(&self, requests: Vec<SessionRequest>) -> Vec<Result<SessionId>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.start_session(request).await);
        }
        results
    }

    async fn start_session(&self, request: SessionRequest) -> Result<SessionId> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let kind = request.heuristic_type;
        // Schema validation happens inside build; a bad request dies here
        // with a Config error before any resource is allocated.
        let heuristic = heuristics::build(kind, &request.session_params)?;

        let sink = heuristics::input_register(kind);
        let config = PipelineConfig {
            network: request.network,
            mode: request.pipeline_type,
            sink_register: sink,
            params: heuristics::pipeline_params(kind, &request.session_params)?,
            start_height: request.start_height,
            end_height: request.end_height,
        };
        config.validate()?;

        let pipeline = self.etl.ensure(config)?;
        let component = ComponentId::generate(request.network, ComponentRole::Engine);
        let expected = registers::register(sink).output;
        let subscription = self.etl.subscribe(pipeline, component, expected)?;

        let session = SessionId::generate(request.network, kind);
        let initial = match request.pipeline_type {
            PipelineMode::Live => SessionState::Active,
            PipelineMode::Backtest => SessionState::Backtesting,
        };
        let cell = SessionCell::new(initial);

        self.router.register_session(
            session,
            request.alerting_params.destinations_override.clone(),
        );

        match serde_json::to_vec(&request) {
            Ok(blob) => {
                if let Err(e) = self.store.save(session, blob).await {
                    warn!(session = %session, error = %e, "failed to persist session snapshot");
                }
            }
            Err(e) => warn!(session = %session, error = %e, "failed to encode session snapshot"),
        }

        let engine_config = EngineConfig {
            session,
            kind,
            policy: request.alerting_params,
        };
        let ctx = EvalContext {
            sources: self.sources.clone(),
            call_timeout: self.call_timeout,
        };
        let cancel = self.cancel.child();
        let handle = tokio::spawn(run_engine(
            engine_config,
            heuristic,
            subscription,
            self.router.clone(),
            ctx,
            cell.clone(),
            self.metrics.clone(),
            cancel.clone(),
        ));

        self.sessions.insert(
            session,
            SessionRecord {
                pipeline,
                cell,
                cancel,
                engine: Mutex::new(Some(handle)),
            },
        );

        info!(session = %session, pipeline = %pipeline, heuristic = %kind, "session bootstrapped");
        Ok(session)
    }

    /// Current state of a session.
    pub fn session_state(&self, session: SessionId) -> Result<SessionState> {
        self.sessions
            .get(&session)
            .map(|r| r.cell.state())
            .ok_or(Error::UnknownSession(session))
    }

    /// The pipeline a session consumes.
    pub fn pipeline_of(&self, session: SessionId) -> Result<PipelineId> {
        self.sessions
            .get(&session)
            .map(|r| r.pipeline)
            .ok_or(Error::UnknownSession(session))
    }

    /// Last emitted height of a session's pipeline; readiness gates poll
    /// this.
    pub fn pipeline_height(&self, session: SessionId) -> Result<u64> {
        let pipeline = self.pipeline_of(session)?;
        self.etl.height(pipeline)
    }

    /// Number of live pipelines across all sessions.
    #[must_use]
    pub fn active_pipelines(&self) -> usize {
        self.etl.active_count()
    }

    /// Reloads the registration snapshot of a session, if one was saved.
    pub async fn snapshot(&self, session: SessionId) -> Result<Option<SessionRequest>> {
        match self.store.load(session).await? {
            Some(blob) => Ok(Some(serde_json::from_slice(&blob)?)),
            None => Ok(None),
        }
    }

    /// Stops one session: the engine exits, its subscription drops (which
    /// may pause the pipeline), and the record is removed.
    pub async fn stop(&self, session: SessionId) -> Result<()> {
        let (_, record) = self
            .sessions
            .remove(&session)
            .ok_or(Error::UnknownSession(session))?;

        record.cancel.cancel("session stopped");
        let handle = record.engine.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(self.drain_grace, handle).await.is_err() {
                warn!(session = %session, "engine exceeded drain window on stop");
            }
        }
        record.cell.set_state(SessionState::Terminated);
        self.router.deregister_session(session);
        info!(session = %session, "session stopped");
        Ok(())
    }

    /// Stops every session, then the ETL manager, then the router.
    pub async fn shutdown(&self) {
        self.cancel.cancel("service shutdown");

        let ids: Vec<SessionId> = self.sessions.iter().map(|e| *e.key()).collect();
        for session in ids {
            if let Some((_, record)) = self.sessions.remove(&session) {
                let handle = record.engine.lock().take();
                if let Some(handle) = handle {
                    let _ = tokio::time::timeout(self.drain_grace, handle).await;
                }
                record.cell.set_state(SessionState::Terminated);
                self.router.deregister_session(session);
            }
        }

        self.etl.shutdown().await;
        self.router.shutdown().await;
        info!("session manager shut down");
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
