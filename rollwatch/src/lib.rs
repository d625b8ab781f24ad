//! # Rollwatch
//!
//! Real-time invariant monitoring for an OP-style rollup deployment: an L1
//! base chain plus an L2 rollup, watched by operator-registered heuristic
//! sessions.
//!
//! The crate is organized around a data-extraction pipeline engine:
//!
//! - **Registers** describe what to extract (headers, logs, balances,
//!   contract reads) and pipelines drive them block-by-block with
//!   backpressure, dedup, and reorg handling.
//! - **Heuristics** evaluate typed pipeline output against session
//!   parameters and produce activations.
//! - **The alert router** fans activations out to severity-routed sinks
//!   (Slack, PagerDuty) with per-dispatch retry.
//! - **The session manager** ties the three together per registered
//!   session and owns lifecycle and shutdown ordering.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use rollwatch::prelude::*;
//!
//! let root = CancelToken::new();
//! let metrics = Arc::new(Metrics::new());
//! let sources = ChainSources::new(l1_client, l2_client);
//! let etl = EtlManager::new(sources.clone(), PipelineSettings::default(), metrics.clone(), &root);
//! let router = Arc::new(AlertRouter::new(RouterSettings::default(), metrics.clone(), &root));
//! let manager = SessionManager::new(etl, router, sources, store, &settings, metrics, &root);
//!
//! let ids = manager.bootstrap(requests).await;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod alerts;
pub mod api;
pub mod cancellation;
pub mod chain;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod etl;
pub mod heuristics;
pub mod observability;
pub mod pipeline;
pub mod registers;
pub mod session;
pub mod state;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::alerts::{
        Alert, AlertRouter, AlertSink, PagerDutySink, RouterSettings, SinkStatus, SlackSink,
    };
    pub use crate::cancellation::{CancelToken, TaskGroup};
    pub use crate::chain::{ChainSource, ChainSources, Header, HttpChainSource, Log, LogFilter};
    pub use crate::core::{
        Activation, AlertPolicy, HeuristicKind, Network, PipelineId, PipelineMode, SessionId,
        SessionState, Severity, Trigger,
    };
    pub use crate::errors::{Error, ErrorKind, Result};
    pub use crate::etl::EtlManager;
    pub use crate::heuristics::{EvalContext, Heuristic};
    pub use crate::observability::Metrics;
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineSettings, Subscription};
    pub use crate::session::{SessionManager, SessionRequest};
    pub use crate::state::{MemoryStateStore, StateStore};
}
