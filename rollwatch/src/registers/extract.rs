//! Register extractors.
//!
//! An extractor is a pure function of `(source, header, params)`: it reads
//! the chain at the header's height and produces zero or more typed items.
//! `NotReady` means the backing node has not caught up to the height yet;
//! the stage retries at its next tick without advancing.

use super::data::{BalanceReading, ContractReading, PipelineData};
use crate::chain::{ChainSource, Header, LogFilter};
use crate::core::RegisterKind;
use crate::errors::{Error, Result};
use alloy_primitives::{Address, Bytes, B256};
use serde_json::{Map, Value};
use std::str::FromStr;

/// The outcome of one extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Items extracted at the header's height (possibly none).
    Out(Vec<PipelineData>),
    /// Data at this height is not available yet; retry next tick.
    NotReady,
}

/// Reads a required address-valued parameter.
pub fn param_address(params: &Map<String, Value>, key: &str) -> Result<Address> {
    let raw = params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::config(format!("missing address parameter '{key}'")))?;
    Address::from_str(raw).map_err(|e| Error::config(format!("bad address '{raw}': {e}")))
}

/// Reads the topic list parameter (hex-encoded 32-byte hashes).
pub fn param_topics(params: &Map<String, Value>) -> Result<Vec<B256>> {
    let raw = params
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::config("missing 'topics' parameter"))?;
    raw.iter()
        .map(|v| {
            let s = v
                .as_str()
                .ok_or_else(|| Error::config("topic entries must be strings"))?;
            B256::from_str(s).map_err(|e| Error::config(format!("bad topic '{s}': {e}")))
        })
        .collect()
}

fn param_calldata(params: &Map<String, Value>) -> Result<Bytes> {
    let raw = params
        .get("calldata")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::config("missing 'calldata' parameter"))?;
    Bytes::from_str(raw).map_err(|e| Error::config(format!("bad calldata '{raw}': {e}")))
}

/// Runs the extractor for `kind` against one header.
pub async fn extract(
    kind: RegisterKind,
    source: &dyn ChainSource,
    header: &Header,
    params: &Map<String, Value>,
) -> Result<Extraction> {
    let result = match kind {
        // The header register is driven by the reader stage directly.
        RegisterKind::BlockHeader => Ok(Extraction::Out(vec![PipelineData::Header(
            header.clone(),
        )])),

        RegisterKind::EventLog => {
            let filter = LogFilter::at_height(header.number)
                .with_address(param_address(params, "address")?)
                .with_topics(param_topics(params)?);
            source.logs(&filter).await.map(|logs| {
                Extraction::Out(logs.into_iter().map(PipelineData::Log).collect())
            })
        }

        RegisterKind::AccountBalance => {
            let address = param_address(params, "address")?;
            source.balance(address, header.number).await.map(|value| {
                Extraction::Out(vec![PipelineData::Balance(BalanceReading {
                    address,
                    value,
                    block_height: header.number,
                    block_hash: header.hash,
                })])
            })
        }

        RegisterKind::ContractRead => {
            let address = param_address(params, "address")?;
            let calldata = param_calldata(params)?;
            source
                .call(address, calldata, header.number)
                .await
                .map(|value| {
                    Extraction::Out(vec![PipelineData::Bytes(ContractReading {
                        address,
                        value,
                        block_height: header.number,
                        block_hash: header.hash,
                    })])
                })
        }
    };

    match result {
        Err(Error::NotFound(_)) => Ok(Extraction::NotReady),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChain;
    use alloy_primitives::{keccak256, U256};
    use serde_json::json;

    fn params_with_address(address: Address) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("address".into(), json!(format!("{address}")));
        params
    }

    #[tokio::test]
    async fn test_balance_extraction() {
        let chain = MockChain::new();
        let alice = Address::repeat_byte(0xa1);
        chain.set_balance(alice, U256::from(7u64));
        let header = chain.add_block();

        let out = extract(
            RegisterKind::AccountBalance,
            &chain,
            &header,
            &params_with_address(alice),
        )
        .await
        .unwrap();

        match out {
            Extraction::Out(items) => {
                assert_eq!(items.len(), 1);
                match &items[0] {
                    PipelineData::Balance(b) => {
                        assert_eq!(b.value, U256::from(7u64));
                        assert_eq!(b.block_height, header.number);
                    }
                    other => panic!("unexpected item {other:?}"),
                }
            }
            Extraction::NotReady => panic!("expected output"),
        }
    }

    #[tokio::test]
    async fn test_balance_not_ready_at_future_height() {
        let chain = MockChain::new();
        let alice = Address::repeat_byte(0xa1);
        let mut header = chain.add_block();
        header.number += 10;

        let out = extract(
            RegisterKind::AccountBalance,
            &chain,
            &header,
            &params_with_address(alice),
        )
        .await
        .unwrap();
        assert_eq!(out, Extraction::NotReady);
    }

    #[tokio::test]
    async fn test_log_extraction_respects_filter() {
        let chain = MockChain::new();
        let watched = Address::repeat_byte(0xcc);
        let sig = keccak256("ConfigUpdate(uint256,uint8,bytes)");

        chain.add_block_with_log(watched, vec![sig], Bytes::new());
        let noise_header =
            chain.add_block_with_log(Address::repeat_byte(0xdd), vec![sig], Bytes::new());

        let mut params = params_with_address(watched);
        params.insert("topics".into(), json!([format!("{sig}")]));

        let header = chain.header_at(1).unwrap();
        let out = extract(RegisterKind::EventLog, &chain, &header, &params)
            .await
            .unwrap();
        match out {
            Extraction::Out(items) => assert_eq!(items.len(), 1),
            Extraction::NotReady => panic!("expected output"),
        }

        let noise = chain.header_at(noise_header.block_number).unwrap();
        let out = extract(RegisterKind::EventLog, &chain, &noise, &params)
            .await
            .unwrap();
        match out {
            Extraction::Out(items) => assert!(items.is_empty()),
            Extraction::NotReady => panic!("expected empty output"),
        }
    }

    #[test]
    fn test_param_address_rejects_garbage() {
        let mut params = Map::new();
        params.insert("address".into(), json!("not-an-address"));
        assert!(param_address(&params, "address").is_err());
        assert!(param_address(&Map::new(), "address").is_err());
    }
}
