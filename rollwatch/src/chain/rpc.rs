//! JSON-RPC [`ChainSource`] over HTTP.
//!
//! Covers the handful of `eth_` methods the service consumes. Transport
//! and RPC-level failures map to `Transient`; a missing block maps to
//! `NotFound` so callers can distinguish "not yet" from "broken".

use super::source::ChainSource;
use super::types::{Header, Log, LogFilter};
use crate::errors::{Error, Result};
use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// A [`ChainSource`] backed by a JSON-RPC endpoint.
pub struct HttpChainSource {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpChainSource {
    /// Creates a source for one RPC endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        #[derive(Deserialize)]
        struct RpcError {
            code: i64,
            message: String,
        }

        #[derive(Deserialize)]
        struct RpcResponse<T> {
            result: Option<T>,
            error: Option<RpcError>,
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(Error::transient(format!(
                "{method} failed: {} (code {})",
                err.message, err.code
            )));
        }
        response
            .result
            .ok_or_else(|| Error::NotFound(format!("{method}: empty result")))
    }

    async fn block(&self, tag: Value) -> Result<Header> {
        // A null result means the block does not exist at this height yet.
        let raw: RawHeader = self
            .request("eth_getBlockByNumber", json!([tag, false]))
            .await?;
        raw.into_header()
    }
}

fn hex_u64(s: &str) -> Result<u64> {
    let trimmed = s.trim_start_matches("0x");
    u64::from_str_radix(trimmed, 16)
        .map_err(|e| Error::transient(format!("malformed hex quantity {s}: {e}")))
}

fn height_tag(height: u64) -> String {
    format!("{height:#x}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawHeader {
    number: String,
    hash: B256,
    parent_hash: B256,
    timestamp: String,
    state_root: B256,
}

impl RawHeader {
    fn into_header(self) -> Result<Header> {
        Ok(Header {
            number: hex_u64(&self.number)?,
            hash: self.hash,
            parent_hash: self.parent_hash,
            timestamp: hex_u64(&self.timestamp)?,
            state_root: self.state_root,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: String,
    block_hash: B256,
    transaction_hash: B256,
    log_index: String,
}

impl RawLog {
    fn into_log(self) -> Result<Log> {
        Ok(Log {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_number: hex_u64(&self.block_number)?,
            block_hash: self.block_hash,
            tx_hash: self.transaction_hash,
            log_index: hex_u64(&self.log_index)?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProof {
    storage_hash: B256,
}

#[async_trait]
impl ChainSource for HttpChainSource {
    async fn header_head(&self) -> Result<Header> {
        self.block(json!("latest")).await
    }

    async fn header_by_number(&self, number: u64) -> Result<Header> {
        self.block(json!(height_tag(number))).await
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>> {
        let mut query = json!({
            "fromBlock": height_tag(filter.from),
            "toBlock": height_tag(filter.to),
        });
        if let Some(address) = filter.address {
            query["address"] = json!(address);
        }
        if !filter.topics.is_empty() {
            query["topics"] = json!([filter.topics]);
        }

        let raw: Vec<RawLog> = self.request("eth_getLogs", json!([query])).await?;
        raw.into_iter().map(RawLog::into_log).collect()
    }

    async fn call(&self, to: Address, data: Bytes, height: u64) -> Result<Bytes> {
        self.request(
            "eth_call",
            json!([{ "to": to, "data": data }, height_tag(height)]),
        )
        .await
    }

    async fn storage_at(&self, address: Address, slot: B256, height: u64) -> Result<B256> {
        self.request(
            "eth_getStorageAt",
            json!([address, slot, height_tag(height)]),
        )
        .await
    }

    async fn storage_root(&self, address: Address, height: u64) -> Result<B256> {
        let proof: RawProof = self
            .request("eth_getProof", json!([address, [], height_tag(height)]))
            .await?;
        Ok(proof.storage_hash)
    }

    async fn balance(&self, address: Address, height: u64) -> Result<U256> {
        let raw: String = self
            .request("eth_getBalance", json!([address, height_tag(height)]))
            .await?;
        U256::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|e| Error::transient(format!("malformed balance {raw}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_u64() {
        assert_eq!(hex_u64("0x0").unwrap(), 0);
        assert_eq!(hex_u64("0x2a").unwrap(), 42);
        assert!(hex_u64("0xzz").is_err());
    }

    #[test]
    fn test_height_tag() {
        assert_eq!(height_tag(0), "0x0");
        assert_eq!(height_tag(255), "0xff");
    }

    #[test]
    fn test_raw_header_decodes() {
        let raw: RawHeader = serde_json::from_value(json!({
            "number": "0x10",
            "hash": B256::repeat_byte(1),
            "parentHash": B256::repeat_byte(2),
            "timestamp": "0x64",
            "stateRoot": B256::repeat_byte(3),
        }))
        .unwrap();

        let header = raw.into_header().unwrap();
        assert_eq!(header.number, 16);
        assert_eq!(header.timestamp, 100);
        assert_eq!(header.parent_hash, B256::repeat_byte(2));
    }
}
