//! Withdrawal enforcement: catch proofs that reference a message passer
//! which never saw the withdrawal.

use super::{EvalContext, Heuristic};
use crate::chain::timed;
use crate::core::{HeuristicKind, Trigger};
use crate::errors::{Error, Result};
use crate::registers::{param_address, PipelineData};
use alloy_primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// topic0 of `WithdrawalProven(bytes32,address,address)`.
#[must_use]
pub(crate) fn withdrawal_proven_topic() -> B256 {
    keccak256("WithdrawalProven(bytes32,address,address)")
}

/// Storage slot of `sentMessages[hash]` on the message passer.
///
/// The mapping sits at slot 0, so the slot is `keccak256(hash ++ 0)`.
#[must_use]
pub fn sent_messages_slot(withdrawal_hash: B256) -> B256 {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(withdrawal_hash.as_slice());
    keccak256(preimage)
}

/// Cross-checks every `WithdrawalProven` event on the L1 portal against
/// the withdrawal ledger of the advertised L2 message passer. A proof for
/// a hash the passer never recorded means the proof references a forged
/// or wrong source contract.
pub struct WithdrawalEnforcement {
    l1_portal: Address,
    l2_to_l1_message_passer: Address,
}

impl WithdrawalEnforcement {
    /// Parses schema-validated parameters.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            l1_portal: param_address(params, "l1_portal")?,
            l2_to_l1_message_passer: param_address(params, "l2_to_l1_message_passer")?,
        })
    }
}

#[async_trait]
impl Heuristic for WithdrawalEnforcement {
    fn kind(&self) -> HeuristicKind {
        HeuristicKind::WithdrawalEnforcement
    }

    async fn evaluate(&self, input: &PipelineData, ctx: &EvalContext) -> Result<Vec<Trigger>> {
        let PipelineData::Log(log) = input else {
            return Err(Error::Heuristic(format!(
                "withdrawal_enforcement fed {} input",
                input.kind()
            )));
        };
        if log.address != self.l1_portal || log.topic0() != Some(withdrawal_proven_topic()) {
            return Ok(Vec::new());
        }
        let withdrawal_hash = *log.topics.get(1).ok_or_else(|| {
            Error::Heuristic("WithdrawalProven log is missing the withdrawal hash topic".into())
        })?;

        let l2 = &ctx.sources.l2;
        let head = timed(ctx.call_timeout, l2.header_head()).await?;
        let recorded = timed(
            ctx.call_timeout,
            l2.storage_at(
                self.l2_to_l1_message_passer,
                sent_messages_slot(withdrawal_hash),
                head.number,
            ),
        )
        .await?;

        if recorded != B256::ZERO {
            return Ok(Vec::new());
        }

        Ok(vec![Trigger::new(
            format!(
                "withdrawal {withdrawal_hash} was proven on portal {} but never initiated on message passer {}",
                self.l1_portal, self.l2_to_l1_message_passer
            ),
            log.block_number,
            log.block_hash,
        )
        .with_context("withdrawal_hash", json!(format!("{withdrawal_hash}")))
        .with_context(
            "message_passer",
            json!(format!("{}", self.l2_to_l1_message_passer)),
        )
        .with_context("portal", json!(format!("{}", self.l1_portal)))
        .with_context("tx_hash", json!(format!("{}", log.tx_hash)))
        .with_context("log_index", json!(log.log_index))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainSources, Log, MockChain};
    use alloy_primitives::Bytes;
    use std::sync::Arc;

    fn setup() -> (Arc<MockChain>, Arc<MockChain>, WithdrawalEnforcement) {
        let l1 = Arc::new(MockChain::new());
        let l2 = Arc::new(MockChain::new());

        let mut params = Map::new();
        params.insert(
            "l1_portal".into(),
            json!(format!("{}", Address::repeat_byte(0x11))),
        );
        params.insert(
            "l2_to_l1_message_passer".into(),
            json!(format!("{}", Address::repeat_byte(0x22))),
        );
        let h = WithdrawalEnforcement::from_params(&params).unwrap();
        (l1, l2, h)
    }

    fn proven_log(withdrawal_hash: B256) -> PipelineData {
        PipelineData::Log(Log {
            address: Address::repeat_byte(0x11),
            topics: vec![withdrawal_proven_topic(), withdrawal_hash],
            data: Bytes::new(),
            block_number: 8,
            block_hash: B256::repeat_byte(8),
            tx_hash: B256::repeat_byte(9),
            log_index: 0,
        })
    }

    #[tokio::test]
    async fn test_fires_when_passer_never_saw_the_withdrawal() {
        let (l1, l2, h) = setup();
        let ctx = EvalContext::new(ChainSources::new(l1, l2));

        let withdrawal = B256::repeat_byte(0x77);
        let triggers = h.evaluate(&proven_log(withdrawal), &ctx).await.unwrap();

        assert_eq!(triggers.len(), 1);
        assert!(triggers[0]
            .detail
            .contains(&format!("{}", Address::repeat_byte(0x22))));
        assert_eq!(
            triggers[0].context["withdrawal_hash"],
            format!("{withdrawal}")
        );
    }

    #[tokio::test]
    async fn test_quiet_when_passer_recorded_the_withdrawal() {
        let (l1, l2, h) = setup();
        let withdrawal = B256::repeat_byte(0x77);

        // The real passer has the withdrawal in its sentMessages ledger.
        l2.set_storage(
            Address::repeat_byte(0x22),
            sent_messages_slot(withdrawal),
            B256::with_last_byte(1),
        );

        let ctx = EvalContext::new(ChainSources::new(l1, l2));
        let triggers = h.evaluate(&proven_log(withdrawal), &ctx).await.unwrap();
        assert!(triggers.is_empty());
    }

    #[tokio::test]
    async fn test_missing_hash_topic_is_heuristic_error() {
        let (l1, l2, h) = setup();
        let ctx = EvalContext::new(ChainSources::new(l1, l2));

        let malformed = PipelineData::Log(Log {
            address: Address::repeat_byte(0x11),
            topics: vec![withdrawal_proven_topic()],
            data: Bytes::new(),
            block_number: 8,
            block_hash: B256::repeat_byte(8),
            tx_hash: B256::repeat_byte(9),
            log_index: 0,
        });
        let err = h.evaluate(&malformed, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Heuristic);
    }

    #[test]
    fn test_sent_messages_slot_is_stable() {
        let hash = B256::repeat_byte(0x42);
        assert_eq!(sent_messages_slot(hash), sent_messages_slot(hash));
        assert_ne!(sent_messages_slot(hash), sent_messages_slot(B256::ZERO));
    }
}
