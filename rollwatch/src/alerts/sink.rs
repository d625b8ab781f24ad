//! Alert sink trait and test support.

use crate::core::Severity;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

/// A rendered alert, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    /// Severity the alert was routed on.
    pub severity: Severity,
    /// Short summary line.
    pub title: String,
    /// Full rendered body.
    pub body: String,
    /// Structured context from the activation.
    pub context: Map<String, Value>,
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    /// Delivered.
    Ok,
    /// Delivery failed but a retry may succeed.
    Transient(String),
    /// Delivery failed for good; do not retry.
    Permanent(String),
}

/// One alert destination (Slack channel, PagerDuty service, ...).
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// The name the routing table refers to this sink by.
    fn name(&self) -> &str;

    /// Attempts one delivery.
    async fn send(&self, alert: &Alert) -> SinkStatus;
}

/// A sink that records alerts in memory, for tests.
#[derive(Debug)]
pub struct CollectingAlertSink {
    name: String,
    alerts: RwLock<Vec<Alert>>,
}

impl CollectingAlertSink {
    /// Creates a collecting sink with a routing name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alerts: RwLock::new(Vec::new()),
        }
    }

    /// All recorded alerts.
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Number of recorded alerts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.alerts.read().len()
    }

    /// True when nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.alerts.read().is_empty()
    }

    /// Clears recorded alerts.
    pub fn clear(&self) {
        self.alerts.write().clear();
    }

    /// Recorded alerts whose body contains a needle.
    #[must_use]
    pub fn bodies_containing(&self, needle: &str) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| a.body.contains(needle) || a.title.contains(needle))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AlertSink for CollectingAlertSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, alert: &Alert) -> SinkStatus {
        self.alerts.write().push(alert.clone());
        SinkStatus::Ok
    }
}
