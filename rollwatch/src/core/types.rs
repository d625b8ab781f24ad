//! Core enums and the alert policy record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which chain a pipeline or session observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// The base chain.
    Layer1,
    /// The rollup chain.
    Layer2,
}

impl Network {
    /// One-byte tag encoded into identifiers.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Layer1 => 1,
            Self::Layer2 => 2,
        }
    }

    /// Decodes an identifier tag byte.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Self::Layer1),
            2 => Some(Self::Layer2),
            _ => None,
        }
    }

    /// Short form used in printable identifiers.
    #[must_use]
    pub const fn short(self) -> &'static str {
        match self {
            Self::Layer1 => "l1",
            Self::Layer2 => "l2",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Layer1 => write!(f, "layer1"),
            Self::Layer2 => write!(f, "layer2"),
        }
    }
}

/// How a pipeline is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Follow the chain head, handling reorgs.
    Live,
    /// Replay a fixed historical range, then terminate.
    Backtest,
}

impl PipelineMode {
    /// One-byte tag encoded into identifiers.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Live => 1,
            Self::Backtest => 2,
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Backtest => write!(f, "backtest"),
        }
    }
}

/// Alert severity. Routing is a function of severity (plus per-session
/// overrides).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; worth a channel message.
    Low,
    /// Needs attention soon.
    Medium,
    /// Page somebody.
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// The catalog of data registers a pipeline can extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    /// Canonical block headers, the root of every pipeline.
    BlockHeader,
    /// Event logs matching an address/topic filter.
    EventLog,
    /// Native balance of one account at each block.
    AccountBalance,
    /// An `eth_call` result at each block.
    ContractRead,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BlockHeader => "block_header",
            Self::EventLog => "event_log",
            Self::AccountBalance => "account_balance",
            Self::ContractRead => "contract_read",
        };
        write!(f, "{s}")
    }
}

/// The typed output of a register, and therefore of a pipeline sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// A block header.
    Header,
    /// A single event log.
    Log,
    /// An account balance reading.
    Balance,
    /// Raw bytes returned by a contract call.
    Bytes,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Header => "header",
            Self::Log => "log",
            Self::Balance => "balance",
            Self::Bytes => "bytes",
        };
        write!(f, "{s}")
    }
}

/// The registered heuristic implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicKind {
    /// Account balance outside configured bounds.
    BalanceEnforcement,
    /// A watched contract emitted a watched event.
    ContractEvent,
    /// A withdrawal was proven against a message passer that never saw it.
    WithdrawalEnforcement,
    /// A proposed L2 output root does not match the reconstructed root.
    FaultDetector,
}

impl HeuristicKind {
    /// One-byte tag encoded into identifiers.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::BalanceEnforcement => 1,
            Self::ContractEvent => 2,
            Self::WithdrawalEnforcement => 3,
            Self::FaultDetector => 4,
        }
    }
}

impl fmt::Display for HeuristicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BalanceEnforcement => "balance_enforcement",
            Self::ContractEvent => "contract_event",
            Self::WithdrawalEnforcement => "withdrawal_enforcement",
            Self::FaultDetector => "fault_detector",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Stages are being constructed; nothing emitted yet.
    Building,
    /// Driving forward with at least one subscriber.
    Running,
    /// No subscribers; eligible for GC after the grace period.
    Paused,
    /// Exceeded the retry budget; subscribers got a terminal error.
    Crashed,
    /// Finished (backtest complete or shut down).
    Terminated,
}

impl PipelineState {
    /// Returns true once the pipeline will never emit again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Crashed | Self::Terminated)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Building => "building",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Crashed => "crashed",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a heuristic session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Accepted but not yet wired to a pipeline.
    Pending,
    /// Evaluating live data.
    Active,
    /// Evaluating a fixed historical range.
    Backtesting,
    /// Parked after a pipeline failure; may be respawned.
    Paused,
    /// Stopped for good.
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Backtesting => "backtesting",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Per-session alerting policy supplied at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Severity attached to every activation of the session.
    pub severity: Severity,
    /// Operator-supplied message included in every alert body.
    pub message: String,
    /// Minimum seconds between alerts; 0 disables suppression.
    #[serde(default)]
    pub cool_down_seconds: u64,
    /// Per-destination opt-in/opt-out, overriding the severity routing
    /// table. Keys are sink names, `false` removes, `true` adds.
    #[serde(default, rename = "destinations")]
    pub destinations_override: Option<HashMap<String, bool>>,
}

impl AlertPolicy {
    /// Builds a policy with no cool-down and no overrides.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            cool_down_seconds: 0,
            destinations_override: None,
        }
    }

    /// Sets the cool-down window.
    #[must_use]
    pub fn with_cool_down(mut self, seconds: u64) -> Self {
        self.cool_down_seconds = seconds;
        self
    }

    /// Sets the destination override map.
    #[must_use]
    pub fn with_destinations(mut self, overrides: HashMap<String, bool>) -> Self {
        self.destinations_override = Some(overrides);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_network_roundtrip() {
        for net in [Network::Layer1, Network::Layer2] {
            assert_eq!(Network::from_tag(net.tag()), Some(net));
        }
        assert_eq!(Network::from_tag(0), None);
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Network::Layer1.to_string(), "layer1");
        assert_eq!(PipelineMode::Backtest.to_string(), "backtest");
        assert_eq!(Severity::Medium.to_string(), "medium");
        assert_eq!(HeuristicKind::BalanceEnforcement.to_string(), "balance_enforcement");
        assert_eq!(RegisterKind::AccountBalance.to_string(), "account_balance");
    }

    #[test]
    fn test_serde_snake_case() {
        let net: Network = serde_json::from_str(r#""layer2""#).unwrap();
        assert_eq!(net, Network::Layer2);
        let kind: HeuristicKind = serde_json::from_str(r#""fault_detector""#).unwrap();
        assert_eq!(kind, HeuristicKind::FaultDetector);
        let mode: PipelineMode = serde_json::from_str(r#""live""#).unwrap();
        assert_eq!(mode, PipelineMode::Live);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_pipeline_state_terminal() {
        assert!(PipelineState::Crashed.is_terminal());
        assert!(PipelineState::Terminated.is_terminal());
        assert!(!PipelineState::Paused.is_terminal());
    }

    #[test]
    fn test_policy_deserialize_defaults() {
        let policy: AlertPolicy =
            serde_json::from_str(r#"{"severity": "medium", "message": "drained"}"#).unwrap();
        assert_eq!(policy.severity, Severity::Medium);
        assert_eq!(policy.cool_down_seconds, 0);
        assert!(policy.destinations_override.is_none());
    }
}
