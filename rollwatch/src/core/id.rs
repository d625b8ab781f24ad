//! Typed 128-bit identifiers.
//!
//! Identifiers are opaque UUIDs with a two-byte typed prefix folded into the
//! leading bytes at construction: the first byte tags the network, the second
//! tags the role (pipeline mode, heuristic kind, or component role). The
//! prefix only eases debugging; equality, ordering, and hashing are bit-wise
//! over the full 128 bits.

use super::types::{HeuristicKind, Network, PipelineMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

fn tagged_uuid(net: u8, role: u8) -> Uuid {
    let mut bytes = *Uuid::new_v4().as_bytes();
    bytes[0] = net;
    bytes[1] = role;
    Uuid::from_bytes(bytes)
}

fn short_hex(id: Uuid) -> String {
    hex::encode(&id.as_bytes()[12..])
}

/// Identifies one running pipeline. The prefix encodes network and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(Uuid);

impl PipelineId {
    /// Generates a fresh id tagged with the pipeline's network and mode.
    #[must_use]
    pub fn generate(network: Network, mode: PipelineMode) -> Self {
        Self(tagged_uuid(network.tag(), mode.tag()))
    }

    /// Decodes the network tag, if the prefix is well-formed.
    #[must_use]
    pub fn network(&self) -> Option<Network> {
        Network::from_tag(self.0.as_bytes()[0])
    }

    /// The underlying 128-bit value.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = self.network().map_or("??", Network::short);
        write!(f, "{net}:pipe:{}", short_hex(self.0))
    }
}

/// Identifies one heuristic session. The prefix encodes network and
/// heuristic kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh id tagged with the session's network and kind.
    #[must_use]
    pub fn generate(network: Network, kind: HeuristicKind) -> Self {
        Self(tagged_uuid(network.tag(), kind.tag()))
    }

    /// Decodes the network tag, if the prefix is well-formed.
    #[must_use]
    pub fn network(&self) -> Option<Network> {
        Network::from_tag(self.0.as_bytes()[0])
    }

    /// The underlying 128-bit value.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = self.network().map_or("??", Network::short);
        write!(f, "{net}:sess:{}", short_hex(self.0))
    }
}

/// The role tag carried by a [`ComponentId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentRole {
    /// A pipeline stage reading from the chain source.
    Reader,
    /// A pipeline stage consuming an upstream channel.
    Subscriber,
    /// A per-session evaluator worker.
    Engine,
}

impl ComponentRole {
    const fn tag(self) -> u8 {
        match self {
            Self::Reader => 1,
            Self::Subscriber => 2,
            Self::Engine => 3,
        }
    }
}

/// Identifies a worker component (a stage or an engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(Uuid);

impl ComponentId {
    /// Generates a fresh id tagged with network and role.
    #[must_use]
    pub fn generate(network: Network, role: ComponentRole) -> Self {
        Self(tagged_uuid(network.tag(), role.tag()))
    }

    /// The underlying 128-bit value.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let net = Network::from_tag(self.0.as_bytes()[0]).map_or("??", Network::short);
        write!(f, "{net}:comp:{}", short_hex(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_decodes() {
        let id = PipelineId::generate(Network::Layer2, PipelineMode::Live);
        assert_eq!(id.network(), Some(Network::Layer2));

        let sid = SessionId::generate(Network::Layer1, HeuristicKind::FaultDetector);
        assert_eq!(sid.network(), Some(Network::Layer1));
        assert_eq!(sid.as_uuid().as_bytes()[1], HeuristicKind::FaultDetector.tag());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = PipelineId::generate(Network::Layer1, PipelineMode::Live);
        let b = PipelineId::generate(Network::Layer1, PipelineMode::Live);
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_carries_prefix() {
        let id = SessionId::generate(Network::Layer2, HeuristicKind::ContractEvent);
        let printed = id.to_string();
        assert!(printed.starts_with("l2:sess:"), "got {printed}");
    }

    #[test]
    fn test_serde_transparent() {
        let id = PipelineId::generate(Network::Layer1, PipelineMode::Backtest);
        let json = serde_json::to_string(&id).unwrap();
        let back: PipelineId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
