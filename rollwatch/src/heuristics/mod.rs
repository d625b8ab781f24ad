//! Heuristic evaluators and the compile-time kind table.
//!
//! Each [`HeuristicKind`] maps to an input register, a parameter schema,
//! and a constructor. Evaluation is deterministic given the same input and
//! chain state; evaluators read the chain but never dispatch alerts.

mod balance;
mod contract_event;
mod fault;
mod schema;
mod withdrawal;

pub use balance::BalanceEnforcement;
pub use contract_event::ContractEvent;
pub use fault::{output_root, FaultDetector};
pub(crate) use fault::output_proposed_topic;
pub use schema::{Field, FieldType, ParamSchema};
pub use withdrawal::{sent_messages_slot, WithdrawalEnforcement};
pub(crate) use withdrawal::withdrawal_proven_topic;

use crate::chain::ChainSources;
use crate::core::{HeuristicKind, RegisterKind, Trigger};
use crate::errors::Result;
use crate::registers::{param_address, PipelineData};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

/// What an evaluator may touch besides its input: chain reads, bounded by
/// the per-call timeout.
#[derive(Clone)]
pub struct EvalContext {
    /// Both chain sources; cross-layer heuristics read the other network.
    pub sources: ChainSources,
    /// Deadline for each chain read issued during evaluation.
    pub call_timeout: Duration,
}

impl EvalContext {
    /// Builds a context with the default 10 s call deadline.
    #[must_use]
    pub fn new(sources: ChainSources) -> Self {
        Self {
            sources,
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// One heuristic implementation bound to its session parameters.
#[async_trait]
pub trait Heuristic: Send + Sync {
    /// The kind tag of the implementation.
    fn kind(&self) -> HeuristicKind;

    /// Evaluates one typed input, returning zero or more triggers.
    ///
    /// Must be deterministic given the same input and chain state. Side
    /// effects belong to the alert router, never to evaluators.
    async fn evaluate(&self, input: &PipelineData, ctx: &EvalContext) -> Result<Vec<Trigger>>;
}

/// The register feeding each heuristic kind.
#[must_use]
pub fn input_register(kind: HeuristicKind) -> RegisterKind {
    match kind {
        HeuristicKind::BalanceEnforcement => RegisterKind::AccountBalance,
        HeuristicKind::ContractEvent
        | HeuristicKind::WithdrawalEnforcement
        | HeuristicKind::FaultDetector => RegisterKind::EventLog,
    }
}

/// The parameter schema of each heuristic kind.
#[must_use]
pub fn schema(kind: HeuristicKind) -> ParamSchema {
    match kind {
        HeuristicKind::BalanceEnforcement => ParamSchema::new(vec![
            Field::required("address", FieldType::Address),
            Field::optional("lower", FieldType::Number),
            Field::optional("upper", FieldType::Number),
        ]),
        HeuristicKind::ContractEvent => ParamSchema::new(vec![
            Field::required("address", FieldType::Address),
            Field::required("signatures", FieldType::StringList),
        ]),
        HeuristicKind::WithdrawalEnforcement => ParamSchema::new(vec![
            Field::required("l1_portal", FieldType::Address),
            Field::required("l2_to_l1_message_passer", FieldType::Address),
        ]),
        HeuristicKind::FaultDetector => ParamSchema::new(vec![
            Field::required("l2_output_oracle", FieldType::Address),
            Field::required("l2_to_l1_message_passer", FieldType::Address),
        ]),
    }
}

/// Validates parameters against the kind's schema and constructs the
/// evaluator.
pub fn build(kind: HeuristicKind, params: &Map<String, Value>) -> Result<Box<dyn Heuristic>> {
    schema(kind).validate(params)?;
    Ok(match kind {
        HeuristicKind::BalanceEnforcement => Box::new(BalanceEnforcement::from_params(params)?),
        HeuristicKind::ContractEvent => Box::new(ContractEvent::from_params(params)?),
        HeuristicKind::WithdrawalEnforcement => {
            Box::new(WithdrawalEnforcement::from_params(params)?)
        }
        HeuristicKind::FaultDetector => Box::new(FaultDetector::from_params(params)?),
    })
}

/// Derives the extraction parameters of the pipeline feeding a session.
///
/// The result is what makes equivalent sessions share a pipeline: two
/// bootstraps watching the same address and events collapse onto the same
/// extraction regardless of their private thresholds.
pub fn pipeline_params(
    kind: HeuristicKind,
    params: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    match kind {
        HeuristicKind::BalanceEnforcement => {
            let address = param_address(params, "address")?;
            out.insert("address".into(), json!(format!("{address}")));
        }
        HeuristicKind::ContractEvent => {
            let address = param_address(params, "address")?;
            let topics = contract_event::signature_topics(params)?;
            out.insert("address".into(), json!(format!("{address}")));
            out.insert(
                "topics".into(),
                Value::Array(topics.iter().map(|t| json!(format!("{t}"))).collect()),
            );
        }
        HeuristicKind::WithdrawalEnforcement => {
            let portal = param_address(params, "l1_portal")?;
            out.insert("address".into(), json!(format!("{portal}")));
            out.insert(
                "topics".into(),
                json!([format!("{}", withdrawal::withdrawal_proven_topic())]),
            );
        }
        HeuristicKind::FaultDetector => {
            let oracle = param_address(params, "l2_output_oracle")?;
            out.insert("address".into(), json!(format!("{oracle}")));
            out.insert(
                "topics".into(),
                json!([format!("{}", fault::output_proposed_topic())]),
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_registers() {
        assert_eq!(
            input_register(HeuristicKind::BalanceEnforcement),
            RegisterKind::AccountBalance
        );
        assert_eq!(
            input_register(HeuristicKind::FaultDetector),
            RegisterKind::EventLog
        );
    }

    #[test]
    fn test_build_rejects_bad_params() {
        let mut params = Map::new();
        params.insert("address".into(), json!("nope"));
        assert!(build(HeuristicKind::BalanceEnforcement, &params).is_err());
    }

    #[test]
    fn test_pipeline_params_drop_private_thresholds() {
        let mut params = Map::new();
        params.insert(
            "address".into(),
            json!("0x00000000000000000000000000000000000000aa"),
        );
        params.insert("lower".into(), json!(3));

        let derived = pipeline_params(HeuristicKind::BalanceEnforcement, &params).unwrap();
        assert!(derived.contains_key("address"));
        assert!(!derived.contains_key("lower"));
    }

    #[test]
    fn test_pipeline_params_hash_signatures() {
        let mut params = Map::new();
        params.insert(
            "address".into(),
            json!("0x00000000000000000000000000000000000000aa"),
        );
        params.insert(
            "signatures".into(),
            json!(["ConfigUpdate(uint256,uint8,bytes)"]),
        );

        let derived = pipeline_params(HeuristicKind::ContractEvent, &params).unwrap();
        let topics = derived.get("topics").unwrap().as_array().unwrap();
        assert_eq!(topics.len(), 1);
        let topic = topics[0].as_str().unwrap();
        assert!(topic.starts_with("0x") && topic.len() == 66);
    }
}
