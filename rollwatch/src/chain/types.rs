//! Normalized chain data types.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

/// A canonical block header, reduced to the fields the service consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block number.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Unix timestamp of the block.
    pub timestamp: u64,
    /// State root after executing the block.
    pub state_root: B256,
}

/// One event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Emitting contract.
    pub address: Address,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<B256>,
    /// ABI-encoded unindexed data.
    pub data: Bytes,
    /// Height of the containing block.
    pub block_number: u64,
    /// Hash of the containing block.
    pub block_hash: B256,
    /// Hash of the emitting transaction.
    pub tx_hash: B256,
    /// Index of the log within the block.
    pub log_index: u64,
}

impl Log {
    /// The event signature hash, if the log has any topics.
    #[must_use]
    pub fn topic0(&self) -> Option<B256> {
        self.topics.first().copied()
    }
}

/// A log query over a height range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Restrict to logs emitted by this contract.
    pub address: Option<Address>,
    /// Accept logs whose `topic0` is any of these; empty accepts all.
    pub topics: Vec<B256>,
    /// First height, inclusive.
    pub from: u64,
    /// Last height, inclusive.
    pub to: u64,
}

impl LogFilter {
    /// Builds a filter spanning a single block.
    #[must_use]
    pub fn at_height(height: u64) -> Self {
        Self {
            address: None,
            topics: Vec::new(),
            from: height,
            to: height,
        }
    }

    /// Restricts the filter to one emitting contract.
    #[must_use]
    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    /// Restricts the filter to a set of event signature hashes.
    #[must_use]
    pub fn with_topics(mut self, topics: Vec<B256>) -> Self {
        self.topics = topics;
        self
    }

    /// Whether a log satisfies the filter.
    #[must_use]
    pub fn matches(&self, log: &Log) -> bool {
        if log.block_number < self.from || log.block_number > self.to {
            return false;
        }
        if let Some(address) = self.address {
            if log.address != address {
                return false;
            }
        }
        if self.topics.is_empty() {
            return true;
        }
        log.topic0().is_some_and(|t| self.topics.contains(&t))
    }
}
