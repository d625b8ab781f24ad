//! Typed values flowing between stages and into subscriptions.

use crate::chain::{Header, Log};
use crate::core::DataKind;
use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// A balance observation at one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReading {
    /// The observed account.
    pub address: Address,
    /// Balance in wei.
    pub value: U256,
    /// Height of the observation.
    pub block_height: u64,
    /// Hash of the observed block.
    pub block_hash: B256,
}

/// An `eth_call` observation at one block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractReading {
    /// The called contract.
    pub address: Address,
    /// Returned bytes.
    pub value: Bytes,
    /// Height of the observation.
    pub block_height: u64,
    /// Hash of the observed block.
    pub block_hash: B256,
}

/// One typed item produced by a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineData {
    /// A block header.
    Header(Header),
    /// One event log.
    Log(Log),
    /// A balance observation.
    Balance(BalanceReading),
    /// A contract read observation.
    Bytes(ContractReading),
}

impl PipelineData {
    /// The output type tag of the item.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::Header(_) => DataKind::Header,
            Self::Log(_) => DataKind::Log,
            Self::Balance(_) => DataKind::Balance,
            Self::Bytes(_) => DataKind::Bytes,
        }
    }

    /// Height the item was observed at.
    #[must_use]
    pub const fn block_height(&self) -> u64 {
        match self {
            Self::Header(h) => h.number,
            Self::Log(l) => l.block_number,
            Self::Balance(b) => b.block_height,
            Self::Bytes(c) => c.block_height,
        }
    }

    /// Hash of the block the item was observed at.
    #[must_use]
    pub const fn block_hash(&self) -> B256 {
        match self {
            Self::Header(h) => h.hash,
            Self::Log(l) => l.block_hash,
            Self::Balance(b) => b.block_hash,
            Self::Bytes(c) => c.block_hash,
        }
    }
}
