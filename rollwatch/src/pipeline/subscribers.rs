//! Subscriber fan-out and subscription handles.
//!
//! The hub is the shared tail of a pipeline: it tracks state and the last
//! emitted height, and fans every frame out to subscriber channels. A
//! [`Subscription`] unsubscribes itself on drop through a weak reference,
//! so an engine going away can never keep its pipeline alive.

use super::event::{CloseReason, PipelineEvent};
use crate::core::{ComponentId, DataKind, PipelineId, PipelineState};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::debug;

/// Shared pipeline tail: state, height, and subscriber channels.
pub struct SubscriberHub {
    pipeline: PipelineId,
    output: DataKind,
    buffer: usize,
    state: RwLock<PipelineState>,
    /// Set when the subscriber count drops to zero.
    paused_at: RwLock<Option<Instant>>,
    last_emitted_height: AtomicU64,
    senders: RwLock<HashMap<ComponentId, mpsc::Sender<PipelineEvent>>>,
}

impl SubscriberHub {
    /// Creates a hub for a pipeline in the `Building` state.
    #[must_use]
    pub fn new(pipeline: PipelineId, output: DataKind, buffer: usize) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            output,
            buffer,
            state: RwLock::new(PipelineState::Building),
            // No subscribers yet: GC-eligible until the first one arrives.
            paused_at: RwLock::new(Some(Instant::now())),
            last_emitted_height: AtomicU64::new(0),
            senders: RwLock::new(HashMap::new()),
        })
    }

    /// The pipeline's sink output type.
    #[must_use]
    pub fn output(&self) -> DataKind {
        self.output
    }

    /// Current pipeline state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.read()
    }

    /// Forces the pipeline state (used by the runtime on spawn/shutdown).
    pub fn set_state(&self, state: PipelineState) {
        *self.state.write() = state;
    }

    /// Height of the last delivered item.
    #[must_use]
    pub fn height(&self) -> u64 {
        self.last_emitted_height.load(Ordering::SeqCst)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.senders.read().len()
    }

    /// How long the pipeline has had zero subscribers (counted from
    /// creation until the first one arrives).
    #[must_use]
    pub fn paused_for(&self) -> Option<Duration> {
        self.paused_at.read().map(|at| at.elapsed())
    }

    /// Registers a subscriber and returns its receiving handle.
    ///
    /// A paused pipeline resumes on its first new subscriber.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, component: ComponentId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.senders.write().insert(component, tx);
        *self.paused_at.write() = None;
        {
            let mut state = self.state.write();
            if *state == PipelineState::Paused {
                *state = PipelineState::Running;
            }
        }
        Subscription {
            component,
            pipeline: self.pipeline,
            output: self.output,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    fn remove(&self, component: ComponentId) {
        let now_empty = {
            let mut senders = self.senders.write();
            senders.remove(&component);
            senders.is_empty()
        };
        if now_empty {
            let mut state = self.state.write();
            if *state == PipelineState::Running {
                *state = PipelineState::Paused;
                *self.paused_at.write() = Some(Instant::now());
                debug!(pipeline = %self.pipeline, "last subscriber left, pipeline paused");
            }
        }
    }

    /// Delivers one frame to every subscriber, applying backpressure.
    ///
    /// Terminal frames transition the pipeline state. Subscribers whose
    /// channel has closed are dropped.
    pub async fn deliver(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Item(item) => {
                self.last_emitted_height
                    .store(item.block_height(), Ordering::SeqCst);
            }
            PipelineEvent::Closed(CloseReason::Completed) => {
                self.set_state(PipelineState::Terminated);
            }
            PipelineEvent::Closed(CloseReason::Crashed(_)) => {
                self.set_state(PipelineState::Crashed);
            }
            PipelineEvent::Rewind(_) => {}
        }

        let targets: Vec<(ComponentId, mpsc::Sender<PipelineEvent>)> = self
            .senders
            .read()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        for (component, tx) in targets {
            if tx.send(event.clone()).await.is_err() {
                self.remove(component);
            }
        }
    }
}

/// A subscriber's receiving end of one pipeline.
///
/// Dropping the subscription unsubscribes the component; the hub is held
/// weakly so a torn-down pipeline is not kept alive by leftover handles.
#[derive(Debug)]
pub struct Subscription {
    component: ComponentId,
    pipeline: PipelineId,
    output: DataKind,
    rx: mpsc::Receiver<PipelineEvent>,
    hub: Weak<SubscriberHub>,
}

impl Subscription {
    /// The subscribing component.
    #[must_use]
    pub fn component(&self) -> ComponentId {
        self.component
    }

    /// The pipeline subscribed to.
    #[must_use]
    pub fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    /// The typed output this subscription yields.
    #[must_use]
    pub fn output(&self) -> DataKind {
        self.output
    }

    /// Receives the next frame; `None` once the pipeline is gone.
    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.component);
        }
    }
}
