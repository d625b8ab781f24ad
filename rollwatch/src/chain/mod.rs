//! Chain access: normalized types, the [`ChainSource`] trait, a JSON-RPC
//! implementation, and a scripted in-memory chain for tests.

mod mock;
mod rpc;
mod source;
mod types;

pub use mock::MockChain;
pub use rpc::HttpChainSource;
pub use source::{timed, ChainSource, ChainSources};
pub use types::{Header, Log, LogFilter};
