//! The ETL manager: owns live pipelines, deduplicates equivalent
//! configurations, and hands out typed subscriptions.
//!
//! Two sessions asking for the same extraction share one pipeline and one
//! upstream filter subscription; that sharing is what keeps the service
//! cheap at scale. A background reaper garbage-collects pipelines that
//! have sat without subscribers past the grace period.

use crate::cancellation::{CancelToken, TaskGroup};
use crate::chain::ChainSources;
use crate::core::{ComponentId, DataKind, PipelineId, PipelineState};
use crate::errors::{Error, Result};
use crate::observability::Metrics;
use crate::pipeline::{Pipeline, PipelineConfig, PipelineSettings, Subscription};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Owns every live pipeline and the equivalence index over them.
pub struct EtlManager {
    sources: ChainSources,
    settings: PipelineSettings,
    metrics: Arc<Metrics>,
    cancel: Arc<CancelToken>,
    pipelines: DashMap<PipelineId, Arc<Pipeline>>,
    /// Equivalence digest -> pipeline id.
    index: DashMap<String, PipelineId>,
    reaper: TaskGroup,
}

impl EtlManager {
    /// Creates the manager and starts its GC reaper task.
    #[must_use]
    pub fn new(
        sources: ChainSources,
        settings: PipelineSettings,
        metrics: Arc<Metrics>,
        parent: &Arc<CancelToken>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            sources,
            settings,
            metrics,
            cancel: parent.child(),
            pipelines: DashMap::new(),
            index: DashMap::new(),
            reaper: TaskGroup::new(parent),
        });

        let weak = Arc::downgrade(&manager);
        let interval = manager.settings.gc_grace / 2;
        manager.reaper.spawn("etl_reaper", move |cancel| async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(interval) => {}
                }
                let Some(manager) = weak.upgrade() else { return };
                manager.reap().await;
            }
        });

        manager
    }

    /// Returns an existing equivalent pipeline or constructs a new one.
    pub fn ensure(&self, config: PipelineConfig) -> Result<PipelineId> {
        if self.cancel.is_cancelled() {
            return Err(Error::Shutdown);
        }

        let digest = config.equivalence_digest();
        if let Some(existing) = self.index.get(&digest) {
            let id = *existing;
            drop(existing);
            // A crashed or terminated pipeline under this digest is stale;
            // fall through and replace it.
            if let Some(pipeline) = self.pipelines.get(&id) {
                if !pipeline.state().is_terminal() {
                    debug!(pipeline = %id, "reusing equivalent pipeline");
                    return Ok(id);
                }
            }
            self.index.remove(&digest);
            self.pipelines.remove(&id);
        }

        let source = self.sources.get(config.network);
        let pipeline = Pipeline::spawn(
            config,
            source,
            &self.cancel,
            &self.settings,
            self.metrics.clone(),
        )?;
        let id = pipeline.id();
        self.pipelines.insert(id, pipeline);
        self.index.insert(digest, id);
        Ok(id)
    }

    /// Subscribes a component to a pipeline's typed output.
    pub fn subscribe(
        &self,
        pipeline: PipelineId,
        component: ComponentId,
        expected: DataKind,
    ) -> Result<Subscription> {
        let entry = self
            .pipelines
            .get(&pipeline)
            .ok_or(Error::UnknownPipeline(pipeline))?;
        entry.subscribe(component, expected)
    }

    /// Drops a subscription, possibly pausing its pipeline.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Last emitted height of a pipeline.
    pub fn height(&self, pipeline: PipelineId) -> Result<u64> {
        self.pipelines
            .get(&pipeline)
            .map(|p| p.height())
            .ok_or(Error::UnknownPipeline(pipeline))
    }

    /// Lifecycle state of a pipeline.
    pub fn state(&self, pipeline: PipelineId) -> Result<PipelineState> {
        self.pipelines
            .get(&pipeline)
            .map(|p| p.state())
            .ok_or(Error::UnknownPipeline(pipeline))
    }

    /// Number of live (non-terminal) pipelines.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.pipelines
            .iter()
            .filter(|entry| !entry.state().is_terminal())
            .count()
    }

    /// Tears down pipelines that outlived their subscribers or finished.
    async fn reap(&self) {
        let doomed: Vec<Arc<Pipeline>> = self
            .pipelines
            .iter()
            .filter(|entry| {
                entry.state().is_terminal()
                    || entry
                        .paused_for()
                        .is_some_and(|idle| idle >= self.settings.gc_grace)
            })
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for pipeline in doomed {
            info!(pipeline = %pipeline.id(), state = %pipeline.state(), "reaping pipeline");
            pipeline.shutdown(self.settings.drain_grace).await;
            self.pipelines.remove(&pipeline.id());
            self.index
                .remove(&pipeline.config().equivalence_digest());
        }
    }

    /// Drains every pipeline and stops the reaper.
    pub async fn shutdown(&self) {
        self.cancel.cancel("etl shutdown");
        self.reaper
            .shutdown("etl shutdown", self.settings.drain_grace)
            .await;

        let all: Vec<Arc<Pipeline>> = self
            .pipelines
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        futures::future::join_all(
            all.iter()
                .map(|pipeline| pipeline.shutdown(self.settings.drain_grace)),
        )
        .await;
        self.pipelines.clear();
        self.index.clear();
    }
}

impl std::fmt::Debug for EtlManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtlManager")
            .field("pipelines", &self.pipelines.len())
            .finish_non_exhaustive()
    }
}
