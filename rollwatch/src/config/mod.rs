//! Application configuration.
//!
//! Settings come from an optional TOML file layered under environment
//! variables; the environment always wins. Only the variables named here
//! are recognized.

use crate::errors::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

/// Environment variables the service recognizes.
const ENV_VARS: &[(&str, &str)] = &[
    ("CHAIN_L1_RPC", "l1_rpc"),
    ("CHAIN_L2_RPC", "l2_rpc"),
    ("ALERT_SLACK_URL", "slack_url"),
    ("ALERT_PAGERDUTY_KEY_LOW", "pagerduty_key_low"),
    ("ALERT_PAGERDUTY_KEY_HIGH", "pagerduty_key_high"),
    ("SERVER_LISTEN", "listen"),
    ("LOG_LEVEL", "log_level"),
];

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Fully-resolved service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// L1 JSON-RPC endpoint.
    pub l1_rpc: String,
    /// L2 JSON-RPC endpoint.
    pub l2_rpc: String,
    /// Slack incoming-webhook URL; Slack routing is disabled when unset.
    #[serde(default)]
    pub slack_url: Option<String>,
    /// PagerDuty routing key for medium-severity pages.
    #[serde(default)]
    pub pagerduty_key_low: Option<String>,
    /// PagerDuty routing key for high-severity pages.
    #[serde(default)]
    pub pagerduty_key_high: Option<String>,
    /// API listen address.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Tracing filter directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit JSON logs.
    #[serde(default)]
    pub log_json: bool,
}

impl AppConfig {
    /// Loads configuration from an optional file plus the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        for (var, key) in ENV_VARS {
            builder = builder
                .set_override_option(*key, std::env::var(var).ok())
                .map_err(|e| Error::config(e.to_string()))?;
        }

        builder
            .build()
            .map_err(|e| Error::config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::config(e.to_string()))
    }

    /// The parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| Error::config(format!("bad listen address '{}': {e}", self.listen)))
    }
}
