//! Orchestrator configuration.
//!
//! The core consumes a structured record from a collaborator loader; this
//! module defines that record with serde defaults for every key plus
//! consuming `with_*` setters for programmatic assembly. Timeouts are
//! stored as fractional seconds (the wire representation) and exposed as
//! [`Duration`]s to the pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::expert::Expert;
use crate::selector::{IntentPin, RankingParams, SelectionStrategy};

/// Default upper bound on agents returned by selection.
const DEFAULT_TOP_K_EXPERTS: usize = 3;
/// Default score floor applied by both selectors.
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;
/// Default relevance-gap cutoff for the semantic strategy.
const DEFAULT_SEMANTIC_GAP: f64 = 0.15;
/// Default relevance-gap cutoff for the capability strategy.
const DEFAULT_CAPABILITY_GAP: f64 = 0.20;
/// Default executor semaphore size.
const DEFAULT_MAX_PARALLELISM: usize = 3;
/// Default per-expert wall-clock budget in seconds.
const DEFAULT_PER_EXPERT_TIMEOUT_SEC: f64 = 12.0;
/// Default synthesis budget in seconds.
const DEFAULT_SYNTHESIS_TIMEOUT_SEC: f64 = 20.0;
/// Default fast-path embedding budget in seconds.
const DEFAULT_FAST_PATH_TIMEOUT_SEC: f64 = 2.0;
/// Default fallback-agent budget in seconds.
const DEFAULT_FALLBACK_TIMEOUT_SEC: f64 = 20.0;
/// Default cosine floor for the fast-path bypass.
const DEFAULT_FAST_PATH_THRESHOLD: f64 = 0.75;
/// Default LRU capacity for the embedding cache.
const DEFAULT_EMBEDDING_CACHE_SIZE: usize = 10_000;

fn default_selection_strategy() -> SelectionStrategy {
    SelectionStrategy::Semantic
}
fn default_top_k_experts() -> usize {
    DEFAULT_TOP_K_EXPERTS
}
fn default_confidence_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_max_parallelism() -> usize {
    DEFAULT_MAX_PARALLELISM
}
fn default_per_expert_timeout_sec() -> f64 {
    DEFAULT_PER_EXPERT_TIMEOUT_SEC
}
fn default_synthesis_timeout_sec() -> f64 {
    DEFAULT_SYNTHESIS_TIMEOUT_SEC
}
fn default_fast_path_timeout_sec() -> f64 {
    DEFAULT_FAST_PATH_TIMEOUT_SEC
}
fn default_fallback_timeout_sec() -> f64 {
    DEFAULT_FALLBACK_TIMEOUT_SEC
}
fn default_true() -> bool {
    true
}
fn default_fast_path_threshold() -> f64 {
    DEFAULT_FAST_PATH_THRESHOLD
}
fn default_bypass_agent_id() -> String {
    "chitchat".to_string()
}
fn default_fallback_agent_id() -> String {
    "one".to_string()
}
fn default_fallback_message() -> String {
    "I'm sorry, I couldn't complete that request right now. Please try again in a moment."
        .to_string()
}
fn default_embedding_cache_size() -> usize {
    DEFAULT_EMBEDDING_CACHE_SIZE
}
fn default_map_pin() -> IntentPin {
    IntentPin::new(
        &[
            "map", "maps", "show on", "visualize", "visualise", "directions", "nearby", "locate",
        ],
        "map",
    )
}
fn default_business_pin() -> IntentPin {
    IntentPin::new(
        &[
            "restaurant",
            "restaurants",
            "cafe",
            "cafes",
            "shop",
            "shops",
            "store",
            "stores",
            "business",
            "businesses",
            "hotel",
            "hotels",
        ],
        "business",
    )
}
fn default_preserved_block_types() -> Vec<String> {
    vec!["interactive_map".to_string()]
}

/// Small English stop-word list used by the capability selector. Tokens
/// that appear verbatim in an expert capability list survive removal.
#[must_use]
pub fn default_stop_words() -> Vec<String> {
    [
        "a", "an", "and", "are", "can", "could", "do", "does", "for", "from", "how", "i", "in",
        "is", "it", "me", "my", "of", "on", "or", "please", "tell", "that", "the", "this", "to",
        "was", "what", "when", "where", "which", "who", "will", "with", "you", "your",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

/// Configuration record for the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoeConfig {
    /// Primary selection strategy.
    #[serde(default = "default_selection_strategy")]
    pub selection_strategy: SelectionStrategy,
    /// Upper bound on agents returned by selection.
    #[serde(default = "default_top_k_experts")]
    pub top_k_experts: usize,
    /// Score floor in both selectors (advisory).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Relevance-gap cutoff; `None` resolves per strategy (0.15 semantic,
    /// 0.20 capability).
    #[serde(default)]
    pub relevance_gap_threshold: Option<f64>,
    /// Executor semaphore size.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Per-expert wall-clock budget, seconds.
    #[serde(default = "default_per_expert_timeout_sec")]
    pub per_expert_timeout_sec: f64,
    /// Synthesis budget, seconds.
    #[serde(default = "default_synthesis_timeout_sec")]
    pub synthesis_timeout_sec: f64,
    /// Fast-path embedding budget, seconds.
    #[serde(default = "default_fast_path_timeout_sec")]
    pub fast_path_timeout_sec: f64,
    /// Fallback-agent budget, seconds.
    #[serde(default = "default_fallback_timeout_sec")]
    pub fallback_timeout_sec: f64,
    /// Whether the fast-path detector runs at all.
    #[serde(default = "default_true")]
    pub fast_path_enabled: bool,
    /// Cosine floor for the fast-path bypass.
    #[serde(default = "default_fast_path_threshold")]
    pub fast_path_threshold: f64,
    /// Agent invoked on fast-path bypass.
    #[serde(default = "default_bypass_agent_id")]
    pub bypass_agent_id: String,
    /// Final-resort agent.
    #[serde(default = "default_fallback_agent_id")]
    pub fallback_agent_id: String,
    /// Last-resort text emitted when the fallback agent itself fails.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
    /// LRU capacity of the embedding cache.
    #[serde(default = "default_embedding_cache_size")]
    pub embedding_cache_size: usize,
    /// Stop words removed before capability scoring.
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,
    /// Map-intent pinning rule.
    #[serde(default = "default_map_pin")]
    pub map_pin: IntentPin,
    /// Business-lookup pinning rule.
    #[serde(default = "default_business_pin")]
    pub business_pin: IntentPin,
    /// Structured-block types preserved through synthesis.
    #[serde(default = "default_preserved_block_types")]
    pub preserved_block_types: Vec<String>,
    /// Concatenate raw outputs when synthesis fails instead of falling
    /// back (recorded as `synthesis_used = false` in the trace).
    #[serde(default = "default_true")]
    pub degrade_on_synthesis_failure: bool,
    /// Synthesize a minimal map block when the map intent fired but no
    /// expert produced one. Off by default.
    #[serde(default)]
    pub auto_inject_map: bool,
    /// Expert pool definitions.
    #[serde(default)]
    pub experts: Vec<Expert>,
}

impl Default for MoeConfig {
    fn default() -> Self {
        Self {
            selection_strategy: default_selection_strategy(),
            top_k_experts: default_top_k_experts(),
            confidence_threshold: default_confidence_threshold(),
            relevance_gap_threshold: None,
            max_parallelism: default_max_parallelism(),
            per_expert_timeout_sec: default_per_expert_timeout_sec(),
            synthesis_timeout_sec: default_synthesis_timeout_sec(),
            fast_path_timeout_sec: default_fast_path_timeout_sec(),
            fallback_timeout_sec: default_fallback_timeout_sec(),
            fast_path_enabled: true,
            fast_path_threshold: default_fast_path_threshold(),
            bypass_agent_id: default_bypass_agent_id(),
            fallback_agent_id: default_fallback_agent_id(),
            fallback_message: default_fallback_message(),
            embedding_cache_size: default_embedding_cache_size(),
            stop_words: default_stop_words(),
            map_pin: default_map_pin(),
            business_pin: default_business_pin(),
            preserved_block_types: default_preserved_block_types(),
            degrade_on_synthesis_failure: true,
            auto_inject_map: false,
            experts: Vec::new(),
        }
    }
}

impl MoeConfig {
    /// Creates a config with every key at its default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the primary selection strategy.
    #[must_use]
    pub const fn with_selection_strategy(mut self, strategy: SelectionStrategy) -> Self {
        self.selection_strategy = strategy;
        self
    }

    /// Sets the upper bound on selected agents.
    #[must_use]
    pub const fn with_top_k_experts(mut self, top_k: usize) -> Self {
        self.top_k_experts = top_k;
        self
    }

    /// Sets the confidence floor.
    #[must_use]
    pub const fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Sets the relevance-gap cutoff for both strategies.
    #[must_use]
    pub const fn with_relevance_gap_threshold(mut self, threshold: f64) -> Self {
        self.relevance_gap_threshold = Some(threshold);
        self
    }

    /// Sets the executor semaphore size.
    #[must_use]
    pub const fn with_max_parallelism(mut self, n: usize) -> Self {
        self.max_parallelism = n;
        self
    }

    /// Sets the per-expert timeout.
    #[must_use]
    pub fn with_per_expert_timeout(mut self, timeout: Duration) -> Self {
        self.per_expert_timeout_sec = timeout.as_secs_f64();
        self
    }

    /// Sets the synthesis timeout.
    #[must_use]
    pub fn with_synthesis_timeout(mut self, timeout: Duration) -> Self {
        self.synthesis_timeout_sec = timeout.as_secs_f64();
        self
    }

    /// Sets the fallback-agent timeout.
    #[must_use]
    pub fn with_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.fallback_timeout_sec = timeout.as_secs_f64();
        self
    }

    /// Enables or disables the fast path.
    #[must_use]
    pub const fn with_fast_path_enabled(mut self, enabled: bool) -> Self {
        self.fast_path_enabled = enabled;
        self
    }

    /// Sets the fast-path cosine floor.
    #[must_use]
    pub const fn with_fast_path_threshold(mut self, threshold: f64) -> Self {
        self.fast_path_threshold = threshold;
        self
    }

    /// Sets the bypass agent.
    #[must_use]
    pub fn with_bypass_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.bypass_agent_id = agent_id.into();
        self
    }

    /// Sets the fallback agent.
    #[must_use]
    pub fn with_fallback_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.fallback_agent_id = agent_id.into();
        self
    }

    /// Sets the last-resort fallback message.
    #[must_use]
    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    /// Sets the embedding cache capacity.
    #[must_use]
    pub const fn with_embedding_cache_size(mut self, size: usize) -> Self {
        self.embedding_cache_size = size;
        self
    }

    /// Sets the map-intent pin.
    #[must_use]
    pub fn with_map_pin(mut self, pin: IntentPin) -> Self {
        self.map_pin = pin;
        self
    }

    /// Sets the business-lookup pin.
    #[must_use]
    pub fn with_business_pin(mut self, pin: IntentPin) -> Self {
        self.business_pin = pin;
        self
    }

    /// Toggles degraded concatenation on synthesis failure.
    #[must_use]
    pub const fn with_degrade_on_synthesis_failure(mut self, enabled: bool) -> Self {
        self.degrade_on_synthesis_failure = enabled;
        self
    }

    /// Toggles the optional map auto-inject step.
    #[must_use]
    pub const fn with_auto_inject_map(mut self, enabled: bool) -> Self {
        self.auto_inject_map = enabled;
        self
    }

    /// Adds an expert to the pool.
    #[must_use]
    pub fn with_expert(mut self, expert: Expert) -> Self {
        self.experts.push(expert);
        self
    }

    /// Replaces the expert pool.
    #[must_use]
    pub fn with_experts(mut self, experts: Vec<Expert>) -> Self {
        self.experts = experts;
        self
    }

    /// Per-expert timeout as a [`Duration`].
    #[must_use]
    pub fn per_expert_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.per_expert_timeout_sec.max(0.0))
    }

    /// Synthesis timeout as a [`Duration`].
    #[must_use]
    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.synthesis_timeout_sec.max(0.0))
    }

    /// Fast-path embedding timeout as a [`Duration`].
    #[must_use]
    pub fn fast_path_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fast_path_timeout_sec.max(0.0))
    }

    /// Fallback-agent timeout as a [`Duration`].
    #[must_use]
    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.fallback_timeout_sec.max(0.0))
    }

    /// Intent pins in application order (map first, then business).
    #[must_use]
    pub fn intent_pins(&self) -> Vec<IntentPin> {
        vec![self.map_pin.clone(), self.business_pin.clone()]
    }

    /// Ranking parameters for the given strategy, resolving the gap
    /// default per strategy when unset.
    #[must_use]
    pub fn ranking_params(&self, strategy: SelectionStrategy) -> RankingParams {
        let gap = self.relevance_gap_threshold.unwrap_or(match strategy {
            SelectionStrategy::Semantic => DEFAULT_SEMANTIC_GAP,
            SelectionStrategy::Capability => DEFAULT_CAPABILITY_GAP,
        });
        RankingParams {
            confidence_threshold: self.confidence_threshold,
            relevance_gap_threshold: gap,
            top_k_experts: self.top_k_experts.max(1),
        }
    }
}
