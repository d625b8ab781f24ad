//! Activations: structured records of one heuristic violation.

use super::id::SessionId;
use super::types::{HeuristicKind, Severity};
use alloy_primitives::B256;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What a heuristic returns when it fires: the violation detail plus the
/// chain location it was observed at. The owning engine stamps the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Human-readable description of the violation.
    pub detail: String,
    /// Structured context (tx hash, log index, thresholds, ...).
    pub context: Map<String, Value>,
    /// Height the violation was observed at.
    pub block_height: u64,
    /// Hash of the block the violation was observed at.
    pub block_hash: B256,
}

impl Trigger {
    /// Builds a trigger with an empty context.
    #[must_use]
    pub fn new(detail: impl Into<String>, block_height: u64, block_hash: B256) -> Self {
        Self {
            detail: detail.into(),
            context: Map::new(),
            block_height,
            block_hash,
        }
    }

    /// Adds one context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// A fully-stamped heuristic violation, ready for the alert router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    /// The session that produced the activation.
    pub session: SessionId,
    /// The heuristic kind of that session.
    pub heuristic: HeuristicKind,
    /// Severity from the session's alert policy.
    pub severity: Severity,
    /// Operator message from the session's alert policy.
    pub message: String,
    /// Violation detail from the heuristic.
    pub detail: String,
    /// Structured context from the heuristic.
    pub context: Map<String, Value>,
    /// When the engine observed the violation.
    pub observed_at: DateTime<Utc>,
    /// Height the violation was observed at.
    pub block_height: u64,
    /// Hash of the block the violation was observed at.
    pub block_hash: B256,
}

impl Activation {
    /// Stamps a heuristic trigger into a routable activation.
    #[must_use]
    pub fn stamp(
        trigger: Trigger,
        session: SessionId,
        heuristic: HeuristicKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session,
            heuristic,
            severity,
            message: message.into(),
            detail: trigger.detail,
            context: trigger.context,
            observed_at: Utc::now(),
            block_height: trigger.block_height,
            block_hash: trigger.block_hash,
        }
    }

    /// Replay-stable identity of the activation.
    ///
    /// Two activations for the same on-chain fact, observed before and after
    /// a rewind, produce the same key. Logs are keyed by transaction hash and
    /// log index; other inputs fall back to height plus detail.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        let tx = self
            .context
            .get("tx_hash")
            .and_then(Value::as_str)
            .unwrap_or("-");
        let log_index = self
            .context
            .get("log_index")
            .and_then(Value::as_u64)
            .map_or_else(|| "-".to_string(), |i| i.to_string());
        if tx == "-" {
            format!("{}:{}:{}", self.block_height, tx, self.detail)
        } else {
            format!("{}:{tx}:{log_index}", self.block_height)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Network;

    fn session() -> SessionId {
        SessionId::generate(Network::Layer1, HeuristicKind::ContractEvent)
    }

    #[test]
    fn test_stamp_carries_trigger_fields() {
        let trigger = Trigger::new("balance 1.0 below lower bound 3.0", 42, B256::ZERO)
            .with_context("threshold", serde_json::json!("lower"));
        let act = Activation::stamp(
            trigger,
            session(),
            HeuristicKind::BalanceEnforcement,
            Severity::Medium,
            "one baby to another says:",
        );

        assert_eq!(act.block_height, 42);
        assert_eq!(act.severity, Severity::Medium);
        assert_eq!(act.context.get("threshold").unwrap(), "lower");
        assert!(act.detail.contains("lower bound"));
    }

    #[test]
    fn test_dedup_key_stable_for_logs() {
        let make = || {
            let trigger = Trigger::new("event observed", 7, B256::ZERO)
                .with_context("tx_hash", serde_json::json!("0xabc"))
                .with_context("log_index", serde_json::json!(3));
            Activation::stamp(
                trigger,
                session(),
                HeuristicKind::ContractEvent,
                Severity::Low,
                "msg",
            )
        };
        assert_eq!(make().dedup_key(), make().dedup_key());
        assert_eq!(make().dedup_key(), "7:0xabc:3");
    }

    #[test]
    fn test_dedup_key_distinguishes_heights() {
        let a = Activation::stamp(
            Trigger::new("below bound", 7, B256::ZERO),
            session(),
            HeuristicKind::BalanceEnforcement,
            Severity::Low,
            "msg",
        );
        let b = Activation::stamp(
            Trigger::new("below bound", 8, B256::ZERO),
            session(),
            HeuristicKind::BalanceEnforcement,
            Severity::Low,
            "msg",
        );
        assert_ne!(a.dedup_key(), b.dedup_key());
    }
}
