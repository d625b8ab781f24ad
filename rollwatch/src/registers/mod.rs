//! The register catalog: what a pipeline can extract, and how.
//!
//! A register names one typed data extraction (headers, logs, balances,
//! contract reads) together with its dependencies. The catalog is fixed at
//! compile time; registers form a DAG rooted at [`RegisterKind::BlockHeader`]
//! with a single sink per pipeline. Lookups are read-only, so no locking.

mod data;
mod extract;

pub use data::{BalanceReading, ContractReading, PipelineData};
pub use extract::{extract, param_address, param_topics, Extraction};

use crate::core::{DataKind, RegisterKind};
use crate::errors::{Error, Result};

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    /// The register's tag.
    pub kind: RegisterKind,
    /// The typed output the register produces.
    pub output: DataKind,
    /// Registers this one consumes. At most one today; the walk below
    /// still treats it as a DAG.
    pub deps: &'static [RegisterKind],
}

const CATALOG: &[Register] = &[
    Register {
        kind: RegisterKind::BlockHeader,
        output: DataKind::Header,
        deps: &[],
    },
    Register {
        kind: RegisterKind::EventLog,
        output: DataKind::Log,
        deps: &[RegisterKind::BlockHeader],
    },
    Register {
        kind: RegisterKind::AccountBalance,
        output: DataKind::Balance,
        deps: &[RegisterKind::BlockHeader],
    },
    Register {
        kind: RegisterKind::ContractRead,
        output: DataKind::Bytes,
        deps: &[RegisterKind::BlockHeader],
    },
];

/// Looks up a catalog entry.
#[must_use]
pub fn register(kind: RegisterKind) -> &'static Register {
    match CATALOG.iter().find(|r| r.kind == kind) {
        Some(register) => register,
        // The catalog is total over RegisterKind.
        None => unreachable!("register catalog is missing {kind}"),
    }
}

/// The stage chain for a sink register, roots first.
///
/// A reverse topological walk from the sink to the header root; the result
/// is the order stages are instantiated and linked in.
pub fn stage_chain(sink: RegisterKind) -> Result<Vec<&'static Register>> {
    let mut chain = vec![register(sink)];
    let mut guard = 0;
    while let Some(&dep) = chain.last().and_then(|r| r.deps.first()) {
        chain.push(register(dep));
        guard += 1;
        if guard > CATALOG.len() {
            return Err(Error::config(format!(
                "register {sink} has a cyclic dependency chain"
            )));
        }
    }
    chain.reverse();
    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_total() {
        for kind in [
            RegisterKind::BlockHeader,
            RegisterKind::EventLog,
            RegisterKind::AccountBalance,
            RegisterKind::ContractRead,
        ] {
            assert_eq!(register(kind).kind, kind);
        }
    }

    #[test]
    fn test_stage_chain_roots_first() {
        let chain = stage_chain(RegisterKind::EventLog).unwrap();
        let kinds: Vec<_> = chain.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RegisterKind::BlockHeader, RegisterKind::EventLog]);
    }

    #[test]
    fn test_header_sink_is_single_stage() {
        let chain = stage_chain(RegisterKind::BlockHeader).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].output, DataKind::Header);
    }
}
