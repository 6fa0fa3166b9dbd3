//! Expert selection strategies.
//!
//! Both selectors score every expert against the query, then run the same
//! ranking pipeline: confidence filter, deterministic sort, relevance-gap
//! cutoff, agent expansion, and intent pinning. The semantic strategy
//! scores by embedding cosine; the capability strategy scores by keyword
//! overlap and needs no network.

pub mod capability;
pub mod semantic;

pub use capability::CapabilitySelector;
pub use semantic::SemanticSelector;

use std::cmp::Ordering;
use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MoeError;
use crate::expert::ExpertPool;

/// Which selection strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionStrategy {
    /// Embedding-based cosine scoring.
    Semantic,
    /// Deterministic keyword/capability scoring.
    Capability,
}

impl std::fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Semantic => f.write_str("semantic"),
            Self::Capability => f.write_str("capability"),
        }
    }
}

/// Scoring record for one expert against one query.
#[derive(Debug, Clone)]
pub struct ScoredExpert {
    /// Expert identifier.
    pub expert_id: String,
    /// Raw similarity (cosine for semantic, match count for capability).
    pub similarity: f64,
    /// `similarity` multiplied by the expert's weight; the ranking key.
    pub weighted_score: f64,
}

/// Trait implemented by both selection strategies.
#[async_trait]
pub trait ExpertSelector: Send + Sync {
    /// Strategy tag recorded in the trace.
    fn strategy(&self) -> SelectionStrategy;

    /// Selects agents for a query, in rank order.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::Selection`] when the pool is empty or the
    /// strategy's scoring inputs are unavailable (for the semantic
    /// strategy, any embedding failure).
    async fn select(&self, query: &str) -> Result<Vec<String>, MoeError>;
}

/// Parameters shared by the ranking pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RankingParams {
    /// Score floor; advisory (an all-below-floor result keeps the top expert).
    pub confidence_threshold: f64,
    /// Maximum drop between consecutive weighted scores before cutting off.
    pub relevance_gap_threshold: f64,
    /// Upper bound on experts kept and agents returned.
    pub top_k_experts: usize,
}

/// An intent-pinning rule: when a query matches the vocabulary and the
/// agent exists in the pool but was not selected, the last selection slot
/// is replaced with the pinned agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentPin {
    /// Tokens or phrases that trigger the pin, matched case-insensitively
    /// with punctuation stripped.
    pub vocabulary: Vec<String>,
    /// The agent to pin into the selection.
    pub agent_id: String,
}

impl IntentPin {
    /// Creates a pin from vocabulary entries and a target agent.
    #[must_use]
    pub fn new(vocabulary: &[&str], agent_id: impl Into<String>) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|s| (*s).to_string()).collect(),
            agent_id: agent_id.into(),
        }
    }
}

/// Lowercases, strips punctuation, and splits on whitespace.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether the query matches any vocabulary entry. Single-token entries
/// match against the token set; multi-word entries match as a phrase over
/// the normalized token stream.
pub(crate) fn intent_matches(query: &str, vocabulary: &[String]) -> bool {
    let tokens = tokenize(query);
    let token_set: HashSet<&str> = tokens.iter().map(String::as_str).collect();
    let normalized = tokens.join(" ");

    vocabulary.iter().any(|entry| {
        let entry_tokens = tokenize(entry);
        match entry_tokens.len() {
            0 => false,
            1 => token_set.contains(entry_tokens[0].as_str()),
            _ => normalized.contains(&entry_tokens.join(" ")),
        }
    })
}

/// Runs the shared filter/sort/gap pipeline over scored experts.
///
/// Ordering is descending weighted score with ties broken by ascending
/// lexicographic expert id, so repeated runs over identical scores are
/// reproducible. The confidence floor is advisory: when nothing passes it,
/// the single top-scoring expert is kept.
pub(crate) fn rank(mut scored: Vec<ScoredExpert>, params: &RankingParams) -> Vec<ScoredExpert> {
    if scored.is_empty() {
        return scored;
    }

    scored.sort_by(|a, b| {
        b.weighted_score
            .partial_cmp(&a.weighted_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.expert_id.cmp(&b.expert_id))
    });

    let passing: Vec<ScoredExpert> = scored
        .iter()
        .filter(|s| s.weighted_score >= params.confidence_threshold)
        .cloned()
        .collect();

    if passing.is_empty() {
        return vec![scored.remove(0)];
    }

    let mut kept: Vec<ScoredExpert> = Vec::with_capacity(passing.len().min(params.top_k_experts));
    for candidate in passing {
        if kept.len() >= params.top_k_experts {
            break;
        }
        if let Some(previous) = kept.last()
            && previous.weighted_score - candidate.weighted_score > params.relevance_gap_threshold
        {
            break;
        }
        kept.push(candidate);
    }

    kept
}

/// Expands ranked experts to their agents, flattening in first-seen order
/// and truncating to `top_k` agents total.
pub(crate) fn expand_agents(
    ranked: &[ScoredExpert],
    pool: &ExpertPool,
    top_k: usize,
) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut agents = Vec::new();

    'outer: for scored in ranked {
        let Some(expert) = pool.get(&scored.expert_id) else {
            continue;
        };
        for agent_id in &expert.agent_ids {
            if seen.insert(agent_id.clone()) {
                agents.push(agent_id.clone());
                if agents.len() >= top_k {
                    break 'outer;
                }
            }
        }
    }

    agents
}

/// Applies intent pins to a selection.
///
/// Each firing pin replaces the last slot not already claimed by an
/// earlier pin; when every slot is claimed, the remaining pins are
/// skipped rather than growing the selection past its bound.
pub(crate) fn apply_intent_pins(
    query: &str,
    selection: &mut Vec<String>,
    pool: &ExpertPool,
    pins: &[IntentPin],
) {
    if selection.is_empty() {
        return;
    }

    let mut replaced = 0_usize;
    for pin in pins {
        if !pool.contains_agent(&pin.agent_id)
            || selection.iter().any(|a| *a == pin.agent_id)
            || !intent_matches(query, &pin.vocabulary)
        {
            continue;
        }
        let Some(slot) = selection.len().checked_sub(1 + replaced) else {
            continue;
        };
        if let Some(entry) = selection.get_mut(slot) {
            *entry = pin.agent_id.clone();
            replaced += 1;
        }
    }
}
