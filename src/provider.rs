//! Collaborator traits injected at orchestrator construction.
//!
//! These, together with [`EmbeddingProvider`](crate::embedding::EmbeddingProvider),
//! are the only externally visible boundaries of the core. Implementations
//! handle transport, authentication, and retries; the core treats them as
//! opaque services with defined failure modes. No global lookups: every
//! collaborator is passed in explicitly.

use async_trait::async_trait;

use crate::error::MoeError;

/// Invokes a concrete agent by id.
///
/// Implementations must be cancellation-aware: the executor drops the
/// invocation future on timeout or request cancel, and any downstream
/// work is expected to stop with it.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    /// Runs the agent against the query, returning its textual output.
    ///
    /// `session_id` is an opaque pass-through from the request.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::AgentInvocation`] (or any other variant) on
    /// failure; the executor materializes it into a result rather than
    /// propagating.
    async fn invoke(
        &self,
        agent_id: &str,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<String, MoeError>;
}

/// Synthesis LLM used by the result mixer.
#[async_trait]
pub trait SynthesisLlm: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Produces one coherent answer from the rendered synthesis prompt.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::Synthesis`] when the model is unreachable or
    /// the response is unusable.
    async fn synthesize(&self, prompt: &str) -> Result<String, MoeError>;
}
