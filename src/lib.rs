//! Mixture-of-Experts query orchestrator.
//!
//! Routes a free-form natural-language query to a small, dynamically-sized
//! subset of specialist "expert" agents, runs them concurrently under time
//! and failure budgets, and synthesizes their outputs into one coherent
//! response that preserves structured JSON payloads (interactive maps and
//! similar) verbatim.
//!
//! # Architecture
//!
//! ```text
//! Query → Orchestrator
//!   ├── FastPathDetector (chitchat? → single bypass agent)
//!   ├── SemanticSelector ──falls open──▶ CapabilitySelector
//!   │     └── EmbeddingCache (LRU + singleflight) → EmbeddingProvider
//!   ├── ExpertExecutor (semaphore-bounded fan-out, per-expert timeout)
//!   │     └── AgentInvoker × N → Vec<ExpertResult>
//!   ├── ResultMixer (SynthesisLlm + structured-block re-injection)
//!   └── Fallback agent → fallback message
//! ```
//!
//! All collaborators — [`provider::AgentInvoker`],
//! [`embedding::EmbeddingProvider`], [`provider::SynthesisLlm`] — are
//! injected at construction; the core holds no global state and persists
//! nothing. Every request yields exactly one `(response, trace)` pair.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use moe_rs::{Expert, MoeConfig, Orchestrator};
//! use moe_rs::providers::{OpenAiEmbeddings, OpenAiSynthesis};
//! # use moe_rs::provider::AgentInvoker;
//! # use moe_rs::error::MoeError;
//! # struct MyInvoker;
//! # #[async_trait::async_trait]
//! # impl AgentInvoker for MyInvoker {
//! #     async fn invoke(&self, _: &str, _: &str, _: Option<&str>) -> Result<String, MoeError> {
//! #         Ok(String::new())
//! #     }
//! # }
//!
//! # async fn run() -> Result<(), MoeError> {
//! let config = MoeConfig::new()
//!     .with_expert(Expert::new(
//!         "finance",
//!         vec!["finance".to_string()],
//!         vec!["stock prices".to_string(), "market data".to_string()],
//!     ));
//!
//! let orchestrator = Orchestrator::new(
//!     config,
//!     Arc::new(MyInvoker),
//!     Some(Arc::new(OpenAiEmbeddings::new("sk-...", None))),
//!     Arc::new(OpenAiSynthesis::new("sk-...", None)),
//! )
//! .await?;
//!
//! let (response, trace) = orchestrator.handle("price of TSLA?", None).await;
//! assert!(!response.is_empty() || trace.error.is_some());
//! # Ok(())
//! # }
//! ```

pub mod blocks;
pub mod config;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod expert;
pub mod fastpath;
pub mod mixer;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod providers;
pub mod selector;
pub mod trace;

// Re-export key types
pub use config::MoeConfig;
pub use embedding::{CacheStats, EmbeddingCache, EmbeddingProvider};
pub use error::{ErrorKind, MoeError};
pub use executor::{ExpertExecutor, ExpertResult, ExpertStatus};
pub use expert::{Expert, ExpertPool};
pub use fastpath::FastPathDetector;
pub use mixer::{MixedResponse, ResultMixer};
pub use orchestrator::Orchestrator;
pub use provider::{AgentInvoker, SynthesisLlm};
pub use selector::{
    CapabilitySelector, ExpertSelector, IntentPin, ScoredExpert, SelectionStrategy,
    SemanticSelector,
};
pub use trace::{RequestPath, Trace, TraceBuilder};
