//! Scripted in-memory chain for tests.
//!
//! The mock holds a canonical chain that tests drive forward block by
//! block, seed with logs, balances, storage, and reorg at will. Queries
//! behave like a real node: future heights are `NotFound`, balances
//! resolve to the latest write at or below the queried height.

use super::source::ChainSource;
use super::types::{Header, Log, LogFilter};
use crate::errors::{Error, Result};
use alloy_primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct ChainState {
    headers: Vec<Header>,
    logs: HashMap<u64, Vec<Log>>,
    /// Balance writes per account, ordered by height.
    balances: HashMap<Address, Vec<(u64, U256)>>,
    storage: HashMap<(Address, B256), B256>,
    storage_roots: HashMap<(Address, u64), B256>,
    calls: HashMap<(Address, Bytes), Bytes>,
    /// Bumped on every reorg so replacement branches hash differently.
    branch: u64,
    tx_counter: u64,
}

impl ChainState {
    fn head(&self) -> Option<&Header> {
        self.headers.last()
    }

    fn block_hash(&self, number: u64, parent: B256) -> B256 {
        let mut preimage = Vec::with_capacity(48);
        preimage.extend_from_slice(&number.to_be_bytes());
        preimage.extend_from_slice(parent.as_slice());
        preimage.extend_from_slice(&self.branch.to_be_bytes());
        keccak256(preimage)
    }

    fn append_block(&mut self) -> Header {
        let (number, parent) = self
            .head()
            .map_or((0, B256::ZERO), |h| (h.number + 1, h.hash));
        let hash = self.block_hash(number, parent);
        let header = Header {
            number,
            hash,
            parent_hash: parent,
            timestamp: 1_700_000_000 + number * 2,
            state_root: keccak256(hash),
        };
        self.headers.push(header.clone());
        header
    }
}

/// A scripted chain implementing [`ChainSource`].
#[derive(Default)]
pub struct MockChain {
    state: RwLock<ChainState>,
}

impl MockChain {
    /// Creates an empty chain with a genesis block.
    #[must_use]
    pub fn new() -> Self {
        let chain = Self::default();
        chain.state.write().append_block();
        chain
    }

    /// Appends one empty block and returns its header.
    pub fn add_block(&self) -> Header {
        self.state.write().append_block()
    }

    /// Appends `n` empty blocks and returns the new head height.
    pub fn extend(&self, n: u64) -> u64 {
        let mut state = self.state.write();
        for _ in 0..n {
            state.append_block();
        }
        state.head().map_or(0, |h| h.number)
    }

    /// Appends a block containing one log and returns the log.
    pub fn add_block_with_log(
        &self,
        address: Address,
        topics: Vec<B256>,
        data: Bytes,
    ) -> Log {
        let mut state = self.state.write();
        let header = state.append_block();
        state.tx_counter += 1;
        let tx_hash = keccak256(state.tx_counter.to_be_bytes());
        let log = Log {
            address,
            topics,
            data,
            block_number: header.number,
            block_hash: header.hash,
            tx_hash,
            log_index: 0,
        };
        state.logs.entry(header.number).or_default().push(log.clone());
        log
    }

    /// Records an account balance effective from the current head onward.
    pub fn set_balance(&self, address: Address, value: U256) {
        let mut state = self.state.write();
        let height = state.head().map_or(0, |h| h.number);
        state.balances.entry(address).or_default().push((height, value));
    }

    /// Seeds one storage slot.
    pub fn set_storage(&self, address: Address, slot: B256, value: B256) {
        self.state.write().storage.insert((address, slot), value);
    }

    /// Seeds the storage root of a contract at a height.
    pub fn set_storage_root(&self, address: Address, height: u64, root: B256) {
        self.state
            .write()
            .storage_roots
            .insert((address, height), root);
    }

    /// Seeds the response of an `eth_call`.
    pub fn set_call_result(&self, to: Address, data: Bytes, result: Bytes) {
        self.state.write().calls.insert((to, data), result);
    }

    /// Current head height.
    #[must_use]
    pub fn head_number(&self) -> u64 {
        self.state.read().head().map_or(0, |h| h.number)
    }

    /// Header at a height, if the chain has reached it.
    #[must_use]
    pub fn header_at(&self, number: u64) -> Option<Header> {
        self.state
            .read()
            .headers
            .iter()
            .find(|h| h.number == number)
            .cloned()
    }

    /// Drops the last `depth` blocks and grows a replacement branch of
    /// `depth + extend` blocks, so the new head is past the old one.
    ///
    /// Logs in the abandoned blocks are discarded; the caller re-seeds
    /// replacements if the scenario needs them.
    pub fn reorg(&self, depth: u64, extend: u64) {
        let mut state = self.state.write();
        let keep = state.headers.len().saturating_sub(depth as usize);
        for dropped in state.headers.drain(keep..).collect::<Vec<_>>() {
            state.logs.remove(&dropped.number);
        }
        state.branch += 1;
        for _ in 0..(depth + extend) {
            state.append_block();
        }
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn header_head(&self) -> Result<Header> {
        self.state
            .read()
            .head()
            .cloned()
            .ok_or_else(|| Error::NotFound("empty chain".into()))
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        self.header_at(number)
            .ok_or_else(|| Error::NotFound(format!("block {number} not available")))
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let state = self.state.read();
        let mut out = Vec::new();
        for height in filter.from..=filter.to {
            if let Some(logs) = state.logs.get(&height) {
                out.extend(logs.iter().filter(|l| filter.matches(l)).cloned());
            }
        }
        Ok(out)
    }

    async fn call(&self, to: Address, data: Bytes, _height: u64) -> Result<Bytes> {
        Ok(self
            .state
            .read()
            .calls
            .get(&(to, data))
            .cloned()
            .unwrap_or_default())
    }

    async fn storage_at(&self, address: Address, slot: B256, _height: u64) -> Result<B256> {
        Ok(self
            .state
            .read()
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or(B256::ZERO))
    }

    async fn storage_root(&self, address: Address, height: u64) -> Result<B256> {
        Ok(self
            .state
            .read()
            .storage_roots
            .get(&(address, height))
            .copied()
            .unwrap_or(B256::ZERO))
    }

    async fn balance(&self, address: Address, height: u64) -> Result<U256> {
        let state = self.state.read();
        if state.head().map_or(0, |h| h.number) < height {
            return Err(Error::NotFound(format!("block {height} not available")));
        }
        Ok(state
            .balances
            .get(&address)
            .and_then(|writes| {
                writes
                    .iter()
                    .rev()
                    .find(|(at, _)| *at <= height)
                    .map(|(_, value)| *value)
            })
            .unwrap_or(U256::ZERO))
    }
}
