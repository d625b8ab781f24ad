//! Error taxonomy for the rollwatch service.
//!
//! Every failure in the system maps to one of a small set of kinds that
//! determine how it propagates: configuration problems are reported to the
//! caller and never retried, transient faults are retried with backoff,
//! heuristic faults are logged and suppressed, and pipeline-fatal faults
//! surface through the meta-alert channel.

use crate::core::{DataKind, PipelineId, SessionId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The coarse classification of an [`Error`].
///
/// Kinds are what the propagation policy is written against; the concrete
/// variants below carry the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid or missing parameters. Reported, never retried.
    Config,
    /// Network or RPC hiccup. Retried with backoff.
    Transient,
    /// Chain reorganization. Handled inside the pipeline, never user-facing.
    Reorg,
    /// A heuristic evaluator failed. Logged and metered, pipeline continues.
    Heuristic,
    /// A pipeline exceeded its retry budget. Surfaced via meta-alert.
    PipelineFatal,
    /// Cooperative cancellation. Not an error at the user boundary.
    Shutdown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Transient => "transient",
            Self::Reorg => "reorg",
            Self::Heuristic => "heuristic",
            Self::PipelineFatal => "pipeline_fatal",
            Self::Shutdown => "shutdown",
        };
        write!(f, "{s}")
    }
}

/// The main error type for rollwatch operations.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Invalid or missing registration parameters.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A retryable network or RPC failure.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Requested chain data does not exist (yet) at the queried height.
    #[error("not found: {0}")]
    NotFound(String),

    /// A reorganization deeper than the configured bound.
    #[error("reorg exceeded maximum depth {max_depth} (walked back {walked})")]
    ReorgTooDeep {
        /// Configured maximum walk-back depth.
        max_depth: u64,
        /// How far the walk-back got before giving up.
        walked: u64,
    },

    /// A heuristic evaluator raised an error (e.g. malformed on-chain data).
    #[error("heuristic failure: {0}")]
    Heuristic(String),

    /// A pipeline exhausted its retry budget and crashed.
    #[error("pipeline failure: {0}")]
    PipelineFatal(String),

    /// No pipeline is registered under the given id.
    #[error("unknown pipeline: {0}")]
    UnknownPipeline(PipelineId),

    /// No session is registered under the given id.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// A subscriber asked for a different output type than the pipeline emits.
    #[error("type mismatch: subscriber expects {expected}, pipeline emits {emits}")]
    TypeMismatch {
        /// The output type the subscriber asked for.
        expected: DataKind,
        /// The output type of the pipeline's sink register.
        emits: DataKind,
    },

    /// The component is shutting down.
    #[error("shutdown in progress")]
    Shutdown,
}

impl Error {
    /// Builds a configuration error.
    #[must_use]
    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config(detail.into())
    }

    /// Builds a transient error.
    #[must_use]
    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient(detail.into())
    }

    /// Returns the coarse kind used by the propagation policy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_)
            | Self::UnknownPipeline(_)
            | Self::UnknownSession(_)
            | Self::TypeMismatch { .. } => ErrorKind::Config,
            Self::Transient(_) | Self::NotFound(_) => ErrorKind::Transient,
            Self::ReorgTooDeep { .. } => ErrorKind::Reorg,
            Self::Heuristic(_) => ErrorKind::Heuristic,
            Self::PipelineFatal(_) => ErrorKind::PipelineFatal,
            Self::Shutdown => ErrorKind::Shutdown,
        }
    }

    /// Returns true if a retry with backoff may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(format!("malformed JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::config("bad address").kind(), ErrorKind::Config);
        assert_eq!(Error::transient("rpc timeout").kind(), ErrorKind::Transient);
        assert_eq!(Error::NotFound("block 7".into()).kind(), ErrorKind::Transient);
        assert_eq!(
            Error::ReorgTooDeep { max_depth: 64, walked: 65 }.kind(),
            ErrorKind::Reorg
        );
        assert_eq!(Error::Heuristic("bad topics".into()).kind(), ErrorKind::Heuristic);
        assert_eq!(Error::PipelineFatal("budget".into()).kind(), ErrorKind::PipelineFatal);
        assert_eq!(Error::Shutdown.kind(), ErrorKind::Shutdown);
    }

    #[test]
    fn test_retryable() {
        assert!(Error::transient("hiccup").is_retryable());
        assert!(!Error::config("bad").is_retryable());
        assert!(!Error::Shutdown.is_retryable());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::Config.to_string(), "config");
        assert_eq!(ErrorKind::PipelineFatal.to_string(), "pipeline_fatal");
    }

    #[test]
    fn test_kind_serialize() {
        let json = serde_json::to_string(&ErrorKind::Transient).unwrap();
        assert_eq!(json, r#""transient""#);
    }
}
