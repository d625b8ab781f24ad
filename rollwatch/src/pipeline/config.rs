//! Pipeline configuration and equivalence.
//!
//! Two configurations are equivalent when their network, mode, sink
//! register, canonicalized parameters, and height range all match; the ETL
//! manager keys its dedup index on the digest computed here.

use crate::core::{Network, PipelineMode, RegisterKind};
use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// What to extract, from where, and over which heights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Which chain the pipeline reads.
    pub network: Network,
    /// Live or backtest driving.
    pub mode: PipelineMode,
    /// The register whose output subscribers receive.
    pub sink_register: RegisterKind,
    /// Extraction parameters (addresses, topics, calldata).
    pub params: Map<String, Value>,
    /// First height to read; live mode defaults to the current head.
    pub start_height: Option<u64>,
    /// Last height to read; required in backtest mode.
    pub end_height: Option<u64>,
}

impl PipelineConfig {
    /// Builds a configuration with empty params and no height range.
    #[must_use]
    pub fn new(network: Network, mode: PipelineMode, sink_register: RegisterKind) -> Self {
        Self {
            network,
            mode,
            sink_register,
            params: Map::new(),
            start_height: None,
            end_height: None,
        }
    }

    /// Adds one extraction parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Sets the height range.
    #[must_use]
    pub fn with_range(mut self, start: Option<u64>, end: Option<u64>) -> Self {
        self.start_height = start;
        self.end_height = end;
        self
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.mode == PipelineMode::Backtest {
            let (Some(start), Some(end)) = (self.start_height, self.end_height) else {
                return Err(Error::config(
                    "backtest pipelines require start_height and end_height",
                ));
            };
            if end < start {
                return Err(Error::config(format!(
                    "backtest range is inverted: {start}..{end}"
                )));
            }
        }
        Ok(())
    }

    /// Parameters in canonical form: keys sorted (the map is ordered),
    /// hex strings lowercased, string arrays sorted.
    #[must_use]
    pub fn canonical_params(&self) -> Map<String, Value> {
        self.params
            .iter()
            .map(|(k, v)| (k.clone(), canonicalize(v)))
            .collect()
    }

    /// The equivalence digest configurations are deduplicated on.
    #[must_use]
    pub fn equivalence_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update([self.network.tag(), self.mode.tag()]);
        hasher.update(self.sink_register.to_string().as_bytes());
        hasher.update(
            serde_json::to_vec(&Value::Object(self.canonical_params())).unwrap_or_default(),
        );
        hasher.update(self.start_height.unwrap_or(0).to_be_bytes());
        hasher.update(self.end_height.unwrap_or(u64::MAX).to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::String(s) if s.starts_with("0x") || s.starts_with("0X") => {
            Value::String(s.to_lowercase())
        }
        Value::Array(items) => {
            let mut canon: Vec<Value> = items.iter().map(canonicalize).collect();
            canon.sort_by(|a, b| a.to_string().cmp(&b.to_string()));
            Value::Array(canon)
        }
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect())
        }
        other => other.clone(),
    }
}
