//! Orchestrator for the query → experts → response pipeline.
//!
//! Drives a request end to end: fast-path consult, expert selection (with
//! per-request fall-open from semantic to capability), bounded parallel
//! execution, result mixing, and the fallback ladder. Every request
//! produces exactly one terminal outcome — a response string and a sealed
//! trace — and expert failures never surface as raised errors.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MoeConfig;
use crate::embedding::{CacheStats, EmbeddingCache, EmbeddingProvider};
use crate::error::{ErrorKind, MoeError};
use crate::executor::{ExpertExecutor, ExpertResult, ExpertStatus};
use crate::expert::ExpertPool;
use crate::fastpath::FastPathDetector;
use crate::mixer::ResultMixer;
use crate::provider::{AgentInvoker, SynthesisLlm};
use crate::selector::{
    CapabilitySelector, ExpertSelector, SelectionStrategy, SemanticSelector,
};
use crate::trace::{ExpertTraceEntry, RequestPath, Trace, TraceBuilder};

/// End-to-end pipeline driver.
///
/// Reentrant: concurrent `handle` calls share the read-only expert pool
/// and the embedding cache; no request mutates orchestrator state.
pub struct Orchestrator {
    config: MoeConfig,
    pool: Arc<ExpertPool>,
    invoker: Arc<dyn AgentInvoker>,
    executor: ExpertExecutor,
    mixer: ResultMixer,
    fast_path: FastPathDetector,
    semantic: Option<SemanticSelector>,
    capability: CapabilitySelector,
    cache: Option<Arc<EmbeddingCache>>,
}

impl Orchestrator {
    /// Assembles the pipeline from config and injected collaborators.
    ///
    /// When the primary strategy is semantic and an embedding provider is
    /// supplied, expert descriptions are batch-embedded here; a short or
    /// malformed batch fails construction with [`MoeError::Selection`] so
    /// the caller can choose to retry in capability-only mode. Without a
    /// provider, the capability strategy becomes permanent and the fast
    /// path runs lexical-only.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::Selection`] on an invalid expert pool or a
    /// failed description batch.
    pub async fn new(
        config: MoeConfig,
        invoker: Arc<dyn AgentInvoker>,
        embedding: Option<Arc<dyn EmbeddingProvider>>,
        synthesis: Arc<dyn SynthesisLlm>,
    ) -> Result<Self, MoeError> {
        let pool = Arc::new(ExpertPool::new(config.experts.clone())?);
        let cache = embedding
            .map(|provider| Arc::new(EmbeddingCache::new(provider, config.embedding_cache_size)));

        let semantic = match (&cache, config.selection_strategy) {
            (Some(cache), SelectionStrategy::Semantic) => Some(
                SemanticSelector::new(
                    Arc::clone(&pool),
                    Arc::clone(cache),
                    config.ranking_params(SelectionStrategy::Semantic),
                    config.intent_pins(),
                )
                .await?,
            ),
            _ => None,
        };

        let capability = CapabilitySelector::new(
            Arc::clone(&pool),
            config.ranking_params(SelectionStrategy::Capability),
            config.intent_pins(),
            &config.stop_words,
        );

        let fast_path = FastPathDetector::new(&config, &pool, cache.clone()).await;
        let executor = ExpertExecutor::new(Arc::clone(&invoker));
        let mixer = ResultMixer::new(&config, Arc::clone(&pool), synthesis);

        info!(
            experts = pool.len(),
            strategy = %config.selection_strategy,
            semantic = semantic.is_some(),
            "orchestrator initialized"
        );

        Ok(Self {
            config,
            pool,
            invoker,
            executor,
            mixer,
            fast_path,
            semantic,
            capability,
            cache,
        })
    }

    /// The expert pool this orchestrator routes over.
    #[must_use]
    pub fn pool(&self) -> &ExpertPool {
        &self.pool
    }

    /// Embedding cache counters, when an embedding provider is configured.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Handles one request to completion.
    ///
    /// Always returns a response string and a sealed trace; failures
    /// surface through the trace (and the fallback message), never as
    /// errors.
    pub async fn handle(&self, query: &str, session_id: Option<&str>) -> (String, Trace) {
        self.handle_with_cancellation(query, session_id, &CancellationToken::new())
            .await
    }

    /// Handles one request with cooperative cancellation.
    ///
    /// Cancelling the token aborts in-flight expert tasks and the
    /// synthesis call; the caller receives an empty response and a trace
    /// sealed with `error = cancelled`.
    pub async fn handle_with_cancellation(
        &self,
        query: &str,
        session_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> (String, Trace) {
        let mut trace = TraceBuilder::new(query);
        debug!(request_id = trace.request_id(), "request accepted");

        let outcome = {
            let pipeline = self.run_pipeline(query, session_id, &mut trace);
            tokio::pin!(pipeline);
            tokio::select! {
                () = cancel.cancelled() => None,
                text = &mut pipeline => Some(text),
            }
        };

        match outcome {
            Some(text) => (text, trace.seal()),
            None => {
                warn!("request cancelled by caller");
                trace.set_error(ErrorKind::Cancelled);
                (String::new(), trace.seal())
            }
        }
    }

    /// The uncancelled pipeline: returns the response text and fills the
    /// trace. Infallible by construction — every failure path ends in the
    /// fallback ladder.
    async fn run_pipeline(
        &self,
        query: &str,
        session_id: Option<&str>,
        trace: &mut TraceBuilder,
    ) -> String {
        // Fast path: trivial queries bypass selection and execution. A
        // bypass-agent failure falls through to the full pipeline, not to
        // the fallback agent.
        if self.config.fast_path_enabled && self.fast_path.should_bypass(query).await {
            match self.invoke_bypass(query, session_id, trace).await {
                Some(text) => return text,
                None => debug!("bypass agent failed; continuing with full pipeline"),
            }
        }

        // Selection, with one-shot fall-open to the capability strategy.
        let selection = self.select(query).await;
        match selection {
            Ok((agents, strategy)) => {
                trace.set_path(RequestPath::Moe);
                trace.set_selection_strategy(strategy);
                trace.set_selected(agents.clone());
                debug!(strategy = %strategy, agents = ?agents, "experts selected");

                let results = self
                    .executor
                    .execute(
                        &agents,
                        query,
                        session_id,
                        self.config.per_expert_timeout(),
                        self.config.max_parallelism,
                    )
                    .await;
                trace.record_results(&results);

                if results.iter().any(ExpertResult::is_ok) {
                    match self.mixer.mix(query, &results).await {
                        Ok(mixed) => {
                            trace.set_synthesis_used(mixed.synthesis_used);
                            trace.set_preserved_block_count(mixed.preserved_block_count);
                            return mixed.text;
                        }
                        Err(e) => warn!(error = %e, "mixing failed; invoking fallback"),
                    }
                } else {
                    warn!("no expert succeeded; invoking fallback");
                }
            }
            Err(e) => warn!(error = %e, "selection failed; invoking fallback"),
        }

        self.fallback(query, session_id, trace).await
    }

    /// Runs the primary selector, falling open to the capability strategy
    /// for this request only when the semantic strategy raises. The
    /// downgrade is never persisted; the next request tries semantic
    /// selection again.
    async fn select(
        &self,
        query: &str,
    ) -> Result<(Vec<String>, SelectionStrategy), MoeError> {
        if let Some(semantic) = &self.semantic {
            match semantic.select(query).await {
                Ok(agents) => return Ok((agents, SelectionStrategy::Semantic)),
                Err(e) => {
                    warn!(error = %e, "semantic selection failed; falling open to capability");
                }
            }
        }

        let agents = self.capability.select(query).await?;
        Ok((agents, SelectionStrategy::Capability))
    }

    /// Invokes the bypass agent, recording the fast-path branch in the
    /// trace. Returns `None` on failure so the caller can continue with
    /// the full pipeline.
    async fn invoke_bypass(
        &self,
        query: &str,
        session_id: Option<&str>,
        trace: &mut TraceBuilder,
    ) -> Option<String> {
        let agent_id = &self.config.bypass_agent_id;
        let start = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.per_expert_timeout(),
            self.invoker.invoke(agent_id, query, session_id),
        )
        .await;
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(text)) => {
                trace.set_path(RequestPath::FastPath);
                trace.set_selected(vec![agent_id.clone()]);
                trace.push_expert(ExpertTraceEntry {
                    agent_id: agent_id.clone(),
                    status: ExpertStatus::Ok,
                    latency_ms,
                });
                debug!(agent = %agent_id, latency_ms, "fast-path bypass answered");
                Some(text)
            }
            Ok(Err(e)) => {
                warn!(agent = %agent_id, error = %e, "bypass agent raised");
                trace.push_expert(ExpertTraceEntry {
                    agent_id: agent_id.clone(),
                    status: ExpertStatus::Error,
                    latency_ms,
                });
                None
            }
            Err(_) => {
                warn!(agent = %agent_id, "bypass agent timed out");
                trace.push_expert(ExpertTraceEntry {
                    agent_id: agent_id.clone(),
                    status: ExpertStatus::Timeout,
                    latency_ms,
                });
                None
            }
        }
    }

    /// Final-resort ladder: the fallback agent, then the configured
    /// message when it too fails.
    async fn fallback(
        &self,
        query: &str,
        session_id: Option<&str>,
        trace: &mut TraceBuilder,
    ) -> String {
        trace.set_path(RequestPath::Fallback);
        let agent_id = &self.config.fallback_agent_id;

        let outcome = tokio::time::timeout(
            self.config.fallback_timeout(),
            self.invoker.invoke(agent_id, query, session_id),
        )
        .await;

        match outcome {
            Ok(Ok(text)) => {
                info!(agent = %agent_id, "fallback agent answered");
                text
            }
            Ok(Err(e)) => {
                warn!(agent = %agent_id, error = %e, "fallback agent raised; emitting fallback message");
                trace.set_error(ErrorKind::FallbackFailed);
                self.config.fallback_message.clone()
            }
            Err(_) => {
                warn!(agent = %agent_id, "fallback agent timed out; emitting fallback message");
                trace.set_error(ErrorKind::FallbackFailed);
                self.config.fallback_message.clone()
            }
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("experts", &self.pool.len())
            .field("strategy", &self.config.selection_strategy)
            .field("semantic", &self.semantic.is_some())
            .finish()
    }
}
