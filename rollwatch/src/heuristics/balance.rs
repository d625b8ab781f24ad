//! Balance enforcement: alert when an account balance leaves its bounds.

use super::{EvalContext, Heuristic};
use crate::core::{HeuristicKind, Trigger};
use crate::errors::{Error, Result};
use crate::registers::{param_address, PipelineData};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde_json::{json, Map, Value};

const WEI_PER_ETH: f64 = 1e18;

fn wei_to_eth(wei: U256) -> f64 {
    wei.to_string().parse::<f64>().unwrap_or(f64::MAX) / WEI_PER_ETH
}

/// Watches one account's native balance against a lower and/or upper
/// bound, both denominated in ETH.
pub struct BalanceEnforcement {
    address: Address,
    lower: Option<f64>,
    upper: Option<f64>,
}

impl BalanceEnforcement {
    /// Parses schema-validated parameters. At least one bound is required.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let lower = params.get("lower").and_then(Value::as_f64);
        let upper = params.get("upper").and_then(Value::as_f64);
        if lower.is_none() && upper.is_none() {
            return Err(Error::config(
                "balance_enforcement requires at least one of 'lower' or 'upper'",
            ));
        }
        Ok(Self {
            address: param_address(params, "address")?,
            lower,
            upper,
        })
    }
}

#[async_trait]
impl Heuristic for BalanceEnforcement {
    fn kind(&self) -> HeuristicKind {
        HeuristicKind::BalanceEnforcement
    }

    async fn evaluate(&self, input: &PipelineData, _ctx: &EvalContext) -> Result<Vec<Trigger>> {
        let PipelineData::Balance(reading) = input else {
            return Err(Error::Heuristic(format!(
                "balance_enforcement fed {} input",
                input.kind()
            )));
        };
        if reading.address != self.address {
            return Ok(Vec::new());
        }

        let eth = wei_to_eth(reading.value);
        let mut triggers = Vec::new();

        if let Some(lower) = self.lower {
            if eth < lower {
                triggers.push(
                    Trigger::new(
                        format!(
                            "balance of {} is {eth} ETH, below the lower bound of {lower} ETH",
                            self.address
                        ),
                        reading.block_height,
                        reading.block_hash,
                    )
                    .with_context("address", json!(format!("{}", self.address)))
                    .with_context("balance_eth", json!(eth))
                    .with_context("violated_bound", json!("lower")),
                );
            }
        }
        if let Some(upper) = self.upper {
            if eth > upper {
                triggers.push(
                    Trigger::new(
                        format!(
                            "balance of {} is {eth} ETH, above the upper bound of {upper} ETH",
                            self.address
                        ),
                        reading.block_height,
                        reading.block_hash,
                    )
                    .with_context("address", json!(format!("{}", self.address)))
                    .with_context("balance_eth", json!(eth))
                    .with_context("violated_bound", json!("upper")),
                );
            }
        }
        Ok(triggers)
    }
}
