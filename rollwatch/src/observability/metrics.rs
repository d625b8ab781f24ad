//! Process-wide counters.
//!
//! Cheap atomic counters shared across components. Read by tests, the
//! health endpoint, and log lines; there is no external metrics surface.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the monitoring engine.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Activations handed to the alert router.
    activations_emitted: AtomicU64,
    /// Activations dropped by cool-down or replay dedup.
    activations_suppressed: AtomicU64,
    /// Heuristic evaluations that returned an error.
    heuristic_errors: AtomicU64,
    /// Alert deliveries that reached a sink.
    alerts_dispatched: AtomicU64,
    /// Alert deliveries that failed permanently.
    alerts_failed: AtomicU64,
    /// Reorgs detected and replayed.
    reorgs_handled: AtomicU64,
    /// Pipelines constructed.
    pipelines_spawned: AtomicU64,
    /// Pipelines that exhausted their retry budget.
    pipelines_crashed: AtomicU64,
}

macro_rules! counter {
    ($record:ident, $get:ident) => {
        /// Increments the counter.
        pub fn $record(&self) {
            self.$get.fetch_add(1, Ordering::Relaxed);
        }

        /// Reads the counter.
        #[must_use]
        pub fn $get(&self) -> u64 {
            self.$get.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(record_activation_emitted, activations_emitted);
    counter!(record_activation_suppressed, activations_suppressed);
    counter!(record_heuristic_error, heuristic_errors);
    counter!(record_alert_dispatched, alerts_dispatched);
    counter!(record_alert_failed, alerts_failed);
    counter!(record_reorg_handled, reorgs_handled);
    counter!(record_pipeline_spawned, pipelines_spawned);
    counter!(record_pipeline_crashed, pipelines_crashed);

    /// Snapshot as a JSON object.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "activations_emitted": self.activations_emitted(),
            "activations_suppressed": self.activations_suppressed(),
            "heuristic_errors": self.heuristic_errors(),
            "alerts_dispatched": self.alerts_dispatched(),
            "alerts_failed": self.alerts_failed(),
            "reorgs_handled": self.reorgs_handled(),
            "pipelines_spawned": self.pipelines_spawned(),
            "pipelines_crashed": self.pipelines_crashed(),
        })
    }
}
