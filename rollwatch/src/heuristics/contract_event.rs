//! Contract event heuristic: alert on every watched event emission.

use super::{EvalContext, Heuristic};
use crate::core::{HeuristicKind, Trigger};
use crate::errors::{Error, Result};
use crate::registers::{param_address, PipelineData};
use alloy_primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// Hashes the declared event signatures into topic0 values.
pub(crate) fn signature_topics(params: &Map<String, Value>) -> Result<Vec<B256>> {
    let signatures = params
        .get("signatures")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::config("missing 'signatures' parameter"))?;
    signatures
        .iter()
        .map(|v| {
            v.as_str()
                .map(keccak256)
                .ok_or_else(|| Error::config("signature entries must be strings"))
        })
        .collect()
}

/// Watches one contract for a set of event signatures; every matching log
/// produces one trigger.
pub struct ContractEvent {
    address: Address,
    /// Signature text keyed by its topic0 hash, for readable alerts.
    signatures: Vec<(B256, String)>,
}

impl ContractEvent {
    /// Parses schema-validated parameters.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let address = param_address(params, "address")?;
        let signatures = params
            .get("signatures")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::config("missing 'signatures' parameter"))?
            .iter()
            .filter_map(Value::as_str)
            .map(|s| (keccak256(s), s.to_string()))
            .collect();
        Ok(Self {
            address,
            signatures,
        })
    }

    fn signature_for(&self, topic0: B256) -> Option<&str> {
        self.signatures
            .iter()
            .find(|(hash, _)| *hash == topic0)
            .map(|(_, text)| text.as_str())
    }
}

#[async_trait]
impl Heuristic for ContractEvent {
    fn kind(&self) -> HeuristicKind {
        HeuristicKind::ContractEvent
    }

    async fn evaluate(&self, input: &PipelineData, _ctx: &EvalContext) -> Result<Vec<Trigger>> {
        let PipelineData::Log(log) = input else {
            return Err(Error::Heuristic(format!(
                "contract_event fed {} input",
                input.kind()
            )));
        };
        if log.address != self.address {
            return Ok(Vec::new());
        }
        let Some(signature) = log.topic0().and_then(|t| self.signature_for(t)) else {
            return Ok(Vec::new());
        };

        Ok(vec![Trigger::new(
            format!("contract {} emitted {signature}", self.address),
            log.block_number,
            log.block_hash,
        )
        .with_context("tx_hash", json!(format!("{}", log.tx_hash)))
        .with_context("log_index", json!(log.log_index))
        .with_context("signature", json!(signature))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainSources, Log, MockChain};
    use alloy_primitives::Bytes;
    use std::sync::Arc;

    const SIG: &str = "ConfigUpdate(uint256,uint8,bytes)";

    fn ctx() -> EvalContext {
        let chain = Arc::new(MockChain::new());
        EvalContext::new(ChainSources::new(chain.clone(), chain))
    }

    fn heuristic(address: Address) -> ContractEvent {
        let mut params = Map::new();
        params.insert("address".into(), json!(format!("{address}")));
        params.insert("signatures".into(), json!([SIG]));
        ContractEvent::from_params(&params).unwrap()
    }

    fn log(address: Address, topic0: B256) -> PipelineData {
        PipelineData::Log(Log {
            address,
            topics: vec![topic0],
            data: Bytes::new(),
            block_number: 4,
            block_hash: B256::repeat_byte(4),
            tx_hash: B256::repeat_byte(7),
            log_index: 2,
        })
    }

    #[tokio::test]
    async fn test_fires_once_per_matching_log() {
        let addr = Address::repeat_byte(0xcc);
        let h = heuristic(addr);

        let triggers = h.evaluate(&log(addr, keccak256(SIG)), &ctx()).await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].context["signature"], SIG);
        assert_eq!(triggers[0].context["log_index"], 2);
        assert!(triggers[0].context["tx_hash"]
            .as_str()
            .unwrap()
            .starts_with("0x"));
    }

    #[tokio::test]
    async fn test_ignores_other_contracts_and_events() {
        let addr = Address::repeat_byte(0xcc);
        let h = heuristic(addr);

        let other_contract = h
            .evaluate(&log(Address::repeat_byte(0xdd), keccak256(SIG)), &ctx())
            .await
            .unwrap();
        assert!(other_contract.is_empty());

        let other_event = h
            .evaluate(&log(addr, keccak256("Transfer(address,address,uint256)")), &ctx())
            .await
            .unwrap();
        assert!(other_event.is_empty());
    }

    #[test]
    fn test_signature_topics() {
        let mut params = Map::new();
        params.insert("signatures".into(), json!([SIG, "Paused()"]));
        let topics = signature_topics(&params).unwrap();
        assert_eq!(topics, vec![keccak256(SIG), keccak256("Paused()")]);
    }
}
