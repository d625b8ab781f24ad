//! Slack webhook sink.

use super::sink::{Alert, AlertSink, SinkStatus};
use async_trait::async_trait;
use serde_json::json;

/// Posts alerts to a Slack incoming webhook.
pub struct SlackSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl SlackSink {
    /// Creates a sink posting to `url`, registered under `name`.
    #[must_use]
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for SlackSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, alert: &Alert) -> SinkStatus {
        let payload = json!({
            "text": format!("*{}*\n{}", alert.title, alert.body),
        });

        let response = match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) => return SinkStatus::Transient(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            SinkStatus::Ok
        } else if status.is_server_error() || status.as_u16() == 429 {
            SinkStatus::Transient(format!("slack returned {status}"))
        } else {
            SinkStatus::Permanent(format!("slack returned {status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_carries_routing_name() {
        let sink = SlackSink::new("slack", "https://hooks.slack.invalid/T000/B000");
        assert_eq!(sink.name(), "slack");
    }
}
