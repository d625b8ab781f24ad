//! The [`ChainSource`] trait: everything the service reads from a chain.

use super::types::{Header, Log, LogFilter};
use crate::core::Network;
use crate::errors::{Error, Result};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Read access to one chain.
///
/// Implementations normalize transport failures into the crate error
/// taxonomy: unreachable node or RPC fault is `Transient`, data that does
/// not exist (yet) at the queried height is `NotFound`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// The current canonical head.
    async fn header_head(&self) -> Result<Header>;

    /// The canonical header at a height.
    async fn header_by_number(&self, number: u64) -> Result<Header>;

    /// Logs matching a filter.
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>>;

    /// Executes a read-only call at a height.
    async fn call(&self, to: Address, data: Bytes, height: u64) -> Result<Bytes>;

    /// One storage slot of a contract at a height.
    async fn storage_at(&self, address: Address, slot: B256, height: u64) -> Result<B256>;

    /// The storage trie root of a contract at a height.
    async fn storage_root(&self, address: Address, height: u64) -> Result<B256>;

    /// Native balance of an account at a height.
    async fn balance(&self, address: Address, height: u64) -> Result<U256>;
}

/// Applies the per-call timeout to a chain read.
///
/// Exceeding the deadline is a retryable [`Error::Transient`].
pub async fn timed<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::transient(format!(
            "chain call exceeded {}ms deadline",
            deadline.as_millis()
        ))),
    }
}

/// The pair of chain sources a deployment monitors.
#[derive(Clone)]
pub struct ChainSources {
    /// Base chain access.
    pub l1: Arc<dyn ChainSource>,
    /// Rollup chain access.
    pub l2: Arc<dyn ChainSource>,
}

impl ChainSources {
    /// Bundles the two sources.
    #[must_use]
    pub fn new(l1: Arc<dyn ChainSource>, l2: Arc<dyn ChainSource>) -> Self {
        Self { l1, l2 }
    }

    /// The source for a network.
    #[must_use]
    pub fn get(&self, network: Network) -> Arc<dyn ChainSource> {
        match network {
            Network::Layer1 => self.l1.clone(),
            Network::Layer2 => self.l2.clone(),
        }
    }
}

impl std::fmt::Debug for ChainSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSources").finish_non_exhaustive()
    }
}
