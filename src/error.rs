//! Error types for the orchestration pipeline.
//!
//! [`MoeError`] is the crate-wide error enum raised by pipeline stages;
//! [`ErrorKind`] is the closed taxonomy carried inside expert results and
//! traces so that every non-ok outcome is classifiable by collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed taxonomy for non-ok outcomes.
///
/// Unlike [`MoeError`], which carries stage-specific detail, this enum is a
/// flat classification suitable for serialization into results and traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Embedding provider call failed or returned malformed data.
    EmbeddingUnavailable,
    /// Expert pool empty or no candidate survived selection.
    SelectorEmpty,
    /// Per-expert wall-clock budget exceeded.
    ExpertTimeout,
    /// Expert invocation raised.
    ExpertError,
    /// Synthesis LLM unreachable or timed out.
    SynthesisUnavailable,
    /// Request cancelled by the caller.
    Cancelled,
    /// Fallback agent itself raised.
    FallbackFailed,
}

impl ErrorKind {
    /// Returns the string representation used in traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EmbeddingUnavailable => "embedding_unavailable",
            Self::SelectorEmpty => "selector_empty",
            Self::ExpertTimeout => "expert_timeout",
            Self::ExpertError => "expert_error",
            Self::SynthesisUnavailable => "synthesis_unavailable",
            Self::Cancelled => "cancelled",
            Self::FallbackFailed => "fallback_failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the orchestration pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum MoeError {
    /// Embedding provider call failed or returned malformed data.
    #[error("embedding provider unavailable: {message}")]
    EmbeddingUnavailable {
        /// Provider-supplied failure detail.
        message: String,
    },

    /// Expert selection failed (empty pool, embedding failure, or an
    /// invalid description batch at startup).
    #[error("expert selection failed: {message}")]
    Selection {
        /// Selection failure detail.
        message: String,
    },

    /// Agent invocation raised.
    #[error("agent '{agent_id}' failed: {message}")]
    AgentInvocation {
        /// The agent that raised.
        agent_id: String,
        /// Invoker-supplied failure detail.
        message: String,
    },

    /// Synthesis LLM unreachable or timed out.
    #[error("synthesis unavailable: {message}")]
    Synthesis {
        /// Synthesis failure detail.
        message: String,
    },

    /// Fallback agent itself raised; the caller receives the configured
    /// fallback message instead of an error.
    #[error("fallback agent '{agent_id}' failed: {message}")]
    FallbackFailed {
        /// The configured fallback agent.
        agent_id: String,
        /// Invoker-supplied failure detail.
        message: String,
    },

    /// Request cancelled by the caller.
    #[error("request cancelled")]
    Cancelled,
}

impl MoeError {
    /// Maps this error to its taxonomy entry.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::EmbeddingUnavailable { .. } => ErrorKind::EmbeddingUnavailable,
            Self::Selection { .. } => ErrorKind::SelectorEmpty,
            Self::AgentInvocation { .. } => ErrorKind::ExpertError,
            Self::Synthesis { .. } => ErrorKind::SynthesisUnavailable,
            Self::FallbackFailed { .. } => ErrorKind::FallbackFailed,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}
