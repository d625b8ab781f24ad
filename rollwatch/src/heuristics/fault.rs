//! Fault detector: recompute proposed L2 output roots and alert on
//! mismatch.

use super::{EvalContext, Heuristic};
use crate::chain::timed;
use crate::core::{HeuristicKind, Trigger};
use crate::errors::{Error, Result};
use crate::registers::{param_address, PipelineData};
use alloy_primitives::{keccak256, Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// topic0 of `OutputProposed(bytes32,uint256,uint256,uint256)`.
#[must_use]
pub(crate) fn output_proposed_topic() -> B256 {
    keccak256("OutputProposed(bytes32,uint256,uint256,uint256)")
}

/// The output root commitment: `keccak256(version ++ state_root ++
/// message_passer_storage_root ++ block_hash)` with version zero.
#[must_use]
pub fn output_root(state_root: B256, storage_root: B256, block_hash: B256) -> B256 {
    let mut preimage = [0u8; 128];
    preimage[32..64].copy_from_slice(state_root.as_slice());
    preimage[64..96].copy_from_slice(storage_root.as_slice());
    preimage[96..128].copy_from_slice(block_hash.as_slice());
    keccak256(preimage)
}

/// Verifies every `OutputProposed` event on the output oracle by
/// reconstructing the root from L2 state at the proposed height.
pub struct FaultDetector {
    l2_output_oracle: Address,
    l2_to_l1_message_passer: Address,
}

impl FaultDetector {
    /// Parses schema-validated parameters.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            l2_output_oracle: param_address(params, "l2_output_oracle")?,
            l2_to_l1_message_passer: param_address(params, "l2_to_l1_message_passer")?,
        })
    }
}

#[async_trait]
impl Heuristic for FaultDetector {
    fn kind(&self) -> HeuristicKind {
        HeuristicKind::FaultDetector
    }

    async fn evaluate(&self, input: &PipelineData, ctx: &EvalContext) -> Result<Vec<Trigger>> {
        let PipelineData::Log(log) = input else {
            return Err(Error::Heuristic(format!(
                "fault_detector fed {} input",
                input.kind()
            )));
        };
        if log.address != self.l2_output_oracle || log.topic0() != Some(output_proposed_topic()) {
            return Ok(Vec::new());
        }

        let proposed_root = *log.topics.get(1).ok_or_else(|| {
            Error::Heuristic("OutputProposed log is missing the output root topic".into())
        })?;
        let l2_height_topic = log.topics.get(3).ok_or_else(|| {
            Error::Heuristic("OutputProposed log is missing the block number topic".into())
        })?;
        let l2_height = u64::try_from(U256::from_be_slice(l2_height_topic.as_slice()))
            .map_err(|_| Error::Heuristic("proposed L2 block number overflows u64".into()))?;

        let l2 = &ctx.sources.l2;
        let header = timed(ctx.call_timeout, l2.header_by_number(l2_height)).await?;
        let storage_root = timed(
            ctx.call_timeout,
            l2.storage_root(self.l2_to_l1_message_passer, l2_height),
        )
        .await?;

        let expected = output_root(header.state_root, storage_root, header.hash);
        if expected == proposed_root {
            return Ok(Vec::new());
        }

        Ok(vec![Trigger::new(
            format!(
                "proposed output root {proposed_root} for L2 block {l2_height} does not match reconstructed root {expected}"
            ),
            log.block_number,
            log.block_hash,
        )
        .with_context("proposed_root", json!(format!("{proposed_root}")))
        .with_context("expected_root", json!(format!("{expected}")))
        .with_context("l2_block_number", json!(l2_height))
        .with_context("tx_hash", json!(format!("{}", log.tx_hash)))
        .with_context("log_index", json!(log.log_index))])
    }
}
