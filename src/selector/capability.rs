//! Capability expert selector.
//!
//! Deterministic keyword scoring with no network I/O. This is the
//! permanent strategy when no embedding provider is configured and the
//! per-request fall-open target when the semantic strategy fails.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{
    ExpertSelector, IntentPin, RankingParams, ScoredExpert, SelectionStrategy, apply_intent_pins,
    expand_agents, rank, tokenize,
};
use crate::error::MoeError;
use crate::expert::{Expert, ExpertPool};

/// Keyword/capability selector.
pub struct CapabilitySelector {
    pool: Arc<ExpertPool>,
    params: RankingParams,
    pins: Vec<IntentPin>,
    stop_words: HashSet<String>,
    /// Tokens that appear verbatim in some capability list; these survive
    /// stop-word removal so location names and intent verbs are not lost.
    capability_vocabulary: HashSet<String>,
}

impl CapabilitySelector {
    /// Builds the selector over an expert pool.
    #[must_use]
    pub fn new(
        pool: Arc<ExpertPool>,
        params: RankingParams,
        pins: Vec<IntentPin>,
        stop_words: &[String],
    ) -> Self {
        let capability_vocabulary = pool.capability_vocabulary();
        let stop_words = stop_words.iter().map(|w| w.to_lowercase()).collect();
        Self {
            pool,
            params,
            pins,
            stop_words,
            capability_vocabulary,
        }
    }

    /// Query tokens with stop words removed, except tokens present in the
    /// capability vocabulary.
    fn effective_tokens(&self, query: &str) -> Vec<String> {
        tokenize(query)
            .into_iter()
            .filter(|t| !self.stop_words.contains(t) || self.capability_vocabulary.contains(t))
            .collect()
    }

    /// Integer match count between tokens and an expert's capabilities:
    /// one point per (token, capability) pair matching exactly or by
    /// bidirectional substring after lowercasing.
    fn match_count(tokens: &[String], expert: &Expert) -> u32 {
        let mut count = 0;
        for capability in &expert.capabilities {
            let cap = capability.to_lowercase();
            for token in tokens {
                if cap.contains(token.as_str()) || token.contains(cap.as_str()) {
                    count += 1;
                }
            }
        }
        count
    }
}

#[async_trait]
impl ExpertSelector for CapabilitySelector {
    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::Capability
    }

    async fn select(&self, query: &str) -> Result<Vec<String>, MoeError> {
        if self.pool.is_empty() {
            return Err(MoeError::Selection {
                message: "expert pool is empty".to_string(),
            });
        }

        let tokens = self.effective_tokens(query);
        let scored: Vec<ScoredExpert> = self
            .pool
            .experts()
            .iter()
            .map(|expert| {
                let similarity = f64::from(Self::match_count(&tokens, expert));
                ScoredExpert {
                    expert_id: expert.expert_id.clone(),
                    similarity,
                    weighted_score: similarity * expert.weight,
                }
            })
            .collect();

        let ranked = rank(scored, &self.params);
        debug!(
            tokens = tokens.len(),
            kept = ranked.len(),
            "capability selection ranked"
        );

        let mut agents = expand_agents(&ranked, &self.pool, self.params.top_k_experts);
        apply_intent_pins(query, &mut agents, &self.pool, &self.pins);
        Ok(agents)
    }
}

impl std::fmt::Debug for CapabilitySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySelector")
            .field("experts", &self.pool.len())
            .field("params", &self.params)
            .field("stop_words", &self.stop_words.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::config::default_stop_words;

    fn pool() -> Arc<ExpertPool> {
        Arc::new(
            ExpertPool::new(vec![
                Expert::new(
                    "finance",
                    vec!["finance".to_string()],
                    vec!["stock prices".to_string(), "market news".to_string()],
                ),
                Expert::new(
                    "weather",
                    vec!["weather".to_string()],
                    vec!["weather forecast".to_string(), "rain".to_string()],
                ),
                Expert::new(
                    "business",
                    vec!["business".to_string()],
                    vec!["restaurants".to_string(), "local businesses".to_string()],
                ),
            ])
            .unwrap_or_else(|e| panic!("pool failed: {e}")),
        )
    }

    fn params() -> RankingParams {
        RankingParams {
            confidence_threshold: 0.5,
            relevance_gap_threshold: 0.20,
            top_k_experts: 3,
        }
    }

    fn selector() -> CapabilitySelector {
        CapabilitySelector::new(pool(), params(), Vec::new(), &default_stop_words())
    }

    #[tokio::test]
    async fn test_select_matches_capability_tokens() {
        let agents = selector()
            .select("what is the stock price of TSLA")
            .await
            .unwrap_or_else(|e| panic!("select failed: {e}"));
        assert_eq!(agents, vec!["finance"]);
    }

    #[tokio::test]
    async fn test_select_no_match_returns_top_by_tie_break() {
        // Nothing matches: every expert scores zero, the advisory
        // threshold keeps the lexicographically-first expert.
        let agents = selector()
            .select("xyzzy")
            .await
            .unwrap_or_else(|e| panic!("select failed: {e}"));
        assert_eq!(agents, vec!["business"]);
    }

    #[tokio::test]
    async fn test_select_empty_pool_errors() {
        let empty = Arc::new(ExpertPool::new(vec![]).unwrap_or_else(|e| panic!("pool: {e}")));
        let selector =
            CapabilitySelector::new(empty, params(), Vec::new(), &default_stop_words());
        let result = selector.select("anything").await;
        assert!(matches!(result, Err(MoeError::Selection { .. })));
    }

    #[test]
    fn test_stop_word_preserved_when_in_capabilities() {
        // "rain" is not a stop word, but make it one: the capability
        // vocabulary exemption must keep it.
        let mut stop_words = default_stop_words();
        stop_words.push("rain".to_string());
        let selector = CapabilitySelector::new(pool(), params(), Vec::new(), &stop_words);

        let tokens = selector.effective_tokens("will it rain today");
        assert!(tokens.contains(&"rain".to_string()));
        // An ordinary stop word is still removed.
        assert!(!tokens.contains(&"it".to_string()));
    }

    #[test]
    fn test_match_count_bidirectional_substring() {
        let expert = Expert::new(
            "finance",
            vec!["finance".to_string()],
            vec!["stocks".to_string()],
        );
        // Token contained in capability.
        assert_eq!(
            CapabilitySelector::match_count(&["stock".to_string()], &expert),
            1
        );
        // Capability contained in token.
        assert_eq!(
            CapabilitySelector::match_count(&["stocksplit".to_string()], &expert),
            1
        );
        assert_eq!(
            CapabilitySelector::match_count(&["bond".to_string()], &expert),
            0
        );
    }

    #[test]
    fn test_weight_scales_score() {
        let heavy = Expert::new(
            "heavy",
            vec!["heavy".to_string()],
            vec!["news".to_string()],
        )
        .with_weight(2.0);
        let tokens = vec!["news".to_string()];
        let similarity = f64::from(CapabilitySelector::match_count(&tokens, &heavy));
        assert!((similarity * heavy.weight - 2.0).abs() < f64::EPSILON);
    }
}
