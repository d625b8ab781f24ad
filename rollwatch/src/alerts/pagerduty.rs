//! PagerDuty Events v2 sink.

use super::sink::{Alert, AlertSink, SinkStatus};
use crate::core::Severity;
use async_trait::async_trait;
use serde_json::json;

const EVENTS_URL: &str = "https://events.pagerduty.com/v2/enqueue";

fn pd_severity(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "info",
        Severity::Medium => "warning",
        Severity::High => "critical",
    }
}

/// Triggers PagerDuty incidents through the Events v2 API.
pub struct PagerDutySink {
    name: String,
    routing_key: String,
    url: String,
    client: reqwest::Client,
}

impl PagerDutySink {
    /// Creates a sink for one integration routing key.
    #[must_use]
    pub fn new(name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routing_key: routing_key.into(),
            url: EVENTS_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Overrides the events endpoint (tests point this at a local server).
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl AlertSink for PagerDutySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, alert: &Alert) -> SinkStatus {
        let payload = json!({
            "routing_key": self.routing_key,
            "event_action": "trigger",
            "payload": {
                "summary": alert.title,
                "source": "rollwatch",
                "severity": pd_severity(alert.severity),
                "custom_details": alert.context,
            },
        });

        let response = match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => return SinkStatus::Transient(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            SinkStatus::Ok
        } else if status.is_server_error() || status.as_u16() == 429 {
            SinkStatus::Transient(format!("pagerduty returned {status}"))
        } else {
            SinkStatus::Permanent(format!("pagerduty returned {status}"))
        }
    }
}
