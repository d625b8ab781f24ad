//! Pipeline runtime: stage construction and lifecycle.

use super::config::PipelineConfig;
use super::stage::{
    run_backtest_reader, run_extract_stage, run_live_reader, Outlet, StageSettings,
};
use super::subscribers::{SubscriberHub, Subscription};
use crate::cancellation::{CancelToken, TaskGroup};
use crate::chain::ChainSource;
use crate::core::{ComponentId, DataKind, PipelineId, PipelineMode, PipelineState};
use crate::errors::{Error, Result};
use crate::observability::Metrics;
use crate::registers::stage_chain;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Tunables for pipeline construction and driving.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Capacity of stage-to-stage and subscriber channels.
    pub buffer: usize,
    /// Reader poll interval; also the `NotReady` retry interval.
    pub pull_interval: Duration,
    /// Per chain-call deadline.
    pub call_timeout: Duration,
    /// Transient failures tolerated before a pipeline crashes.
    pub retry_budget: u32,
    /// First retry delay.
    pub backoff_base: Duration,
    /// Retry delay ceiling.
    pub backoff_cap: Duration,
    /// Deepest reorg handled before declaring the pipeline fatal.
    pub max_reorg_depth: u64,
    /// How long a paused pipeline survives before GC.
    pub gc_grace: Duration,
    /// Drain window on shutdown before tasks are aborted.
    pub drain_grace: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            buffer: 100,
            pull_interval: Duration::from_secs(1),
            call_timeout: Duration::from_secs(10),
            retry_budget: 8,
            backoff_base: Duration::from_millis(250),
            backoff_cap: Duration::from_secs(30),
            max_reorg_depth: 64,
            gc_grace: Duration::from_secs(30),
            drain_grace: Duration::from_secs(10),
        }
    }
}

impl PipelineSettings {
    pub(crate) fn stage(&self) -> StageSettings {
        StageSettings {
            pull_interval: self.pull_interval,
            call_timeout: self.call_timeout,
            retry_budget: self.retry_budget,
            backoff_base: self.backoff_base,
            backoff_cap: self.backoff_cap,
            max_reorg_depth: self.max_reorg_depth,
        }
    }
}

/// A running pipeline: one task per stage, fanning out to subscribers.
pub struct Pipeline {
    id: PipelineId,
    config: PipelineConfig,
    hub: Arc<SubscriberHub>,
    tasks: TaskGroup,
}

impl Pipeline {
    /// Validates the configuration, builds the stage chain from the sink
    /// register back to the header root, and spawns one task per stage.
    pub fn spawn(
        config: PipelineConfig,
        source: Arc<dyn ChainSource>,
        parent: &Arc<CancelToken>,
        settings: &PipelineSettings,
        metrics: Arc<Metrics>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let chain = stage_chain(config.sink_register)?;
        let sink_output = chain.last().map_or(DataKind::Header, |r| r.output);

        let id = PipelineId::generate(config.network, config.mode);
        let hub = SubscriberHub::new(id, sink_output, settings.buffer);
        let tasks = TaskGroup::new(parent);
        let stage_settings = settings.stage();

        // Link stages sink-first so each stage's outlet exists before the
        // stage feeding it is spawned.
        let mut next_outlet = Outlet::Hub(hub.clone());
        for register in chain.iter().skip(1).rev() {
            let (tx, rx) = mpsc::channel(settings.buffer);
            let outlet = std::mem::replace(&mut next_outlet, Outlet::Channel(tx));
            let kind = register.kind;
            let params = config.params.clone();
            let source = source.clone();
            let stage_settings = stage_settings.clone();
            let metrics = metrics.clone();
            tasks.spawn(format!("stage:{kind}"), move |cancel| {
                run_extract_stage(
                    kind,
                    params,
                    source,
                    rx,
                    outlet,
                    stage_settings,
                    cancel,
                    metrics,
                )
            });
        }

        {
            let reader_outlet = next_outlet;
            let source = source.clone();
            let stage_settings = stage_settings.clone();
            let metrics_reader = metrics.clone();
            match config.mode {
                PipelineMode::Live => {
                    let start = config.start_height;
                    tasks.spawn("stage:header_reader", move |cancel| {
                        run_live_reader(
                            source,
                            start,
                            reader_outlet,
                            stage_settings,
                            cancel,
                            metrics_reader,
                        )
                    });
                }
                PipelineMode::Backtest => {
                    // validate() guarantees the range is present.
                    let start = config.start_height.unwrap_or_default();
                    let end = config.end_height.unwrap_or_default();
                    tasks.spawn("stage:header_reader", move |cancel| {
                        run_backtest_reader(
                            source,
                            start,
                            end,
                            reader_outlet,
                            stage_settings,
                            cancel,
                            metrics_reader,
                        )
                    });
                }
            }
        }

        hub.set_state(PipelineState::Running);
        metrics.record_pipeline_spawned();
        info!(pipeline = %id, sink = %config.sink_register, mode = %config.mode, "pipeline spawned");

        Ok(Arc::new(Self {
            id,
            config,
            hub,
            tasks,
        }))
    }

    /// The pipeline's identifier.
    #[must_use]
    pub fn id(&self) -> PipelineId {
        self.id
    }

    /// The configuration the pipeline was built from.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The typed output subscribers receive.
    #[must_use]
    pub fn sink_output(&self) -> DataKind {
        self.hub.output()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.hub.state()
    }

    /// Height of the last emitted item.
    #[must_use]
    pub fn height(&self) -> u64 {
        self.hub.height()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    /// How long the pipeline has been without subscribers, if paused.
    #[must_use]
    pub fn paused_for(&self) -> Option<Duration> {
        self.hub.paused_for()
    }

    /// Registers a subscriber expecting the given output type.
    pub fn subscribe(&self, component: ComponentId, expected: DataKind) -> Result<Subscription> {
        if expected != self.hub.output() {
            return Err(Error::TypeMismatch {
                expected,
                emits: self.hub.output(),
            });
        }
        if self.state().is_terminal() {
            return Err(Error::UnknownPipeline(self.id));
        }
        Ok(self.hub.subscribe(component))
    }

    /// Cancels all stages and drains them within `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.tasks.shutdown("pipeline shutdown", grace).await;
        if !self.hub.state().is_terminal() {
            self.hub.set_state(PipelineState::Terminated);
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id.to_string())
            .field("state", &self.state())
            .field("height", &self.height())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
