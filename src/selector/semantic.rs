//! Semantic expert selector.
//!
//! Scores experts by cosine similarity between the query embedding and a
//! per-expert description embedding computed once at startup. Description
//! vectors are submitted as a single provider batch; a short batch or a
//! ragged dimension fails construction loudly so the caller can fall back
//! to capability-only operation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{
    ExpertSelector, IntentPin, RankingParams, ScoredExpert, SelectionStrategy, apply_intent_pins,
    expand_agents, rank,
};
use crate::embedding::{EmbeddingCache, cosine};
use crate::error::MoeError;
use crate::expert::{Expert, ExpertPool};

/// Embedding-based selector.
pub struct SemanticSelector {
    pool: Arc<ExpertPool>,
    cache: Arc<EmbeddingCache>,
    vectors: HashMap<String, Arc<Vec<f32>>>,
    params: RankingParams,
    pins: Vec<IntentPin>,
}

impl SemanticSelector {
    /// Builds the selector, batch-embedding every expert description.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::Selection`] when the pool is empty, the batch
    /// call fails or returns fewer vectors than experts, or any vector has
    /// an unexpected dimension.
    pub async fn new(
        pool: Arc<ExpertPool>,
        cache: Arc<EmbeddingCache>,
        params: RankingParams,
        pins: Vec<IntentPin>,
    ) -> Result<Self, MoeError> {
        if pool.is_empty() {
            return Err(MoeError::Selection {
                message: "expert pool is empty".to_string(),
            });
        }

        let descriptions: Vec<String> = pool.experts().iter().map(Expert::description).collect();
        let embedded = cache.embed_many(&descriptions).await.map_err(|e| {
            MoeError::Selection {
                message: format!("expert description batch failed: {e}"),
            }
        })?;

        if embedded.len() != pool.len() {
            return Err(MoeError::Selection {
                message: format!(
                    "expert description batch returned {} vectors for {} experts",
                    embedded.len(),
                    pool.len()
                ),
            });
        }

        let dim = embedded.first().map_or(0, |v| v.len());
        if dim == 0 || embedded.iter().any(|v| v.len() != dim) {
            return Err(MoeError::Selection {
                message: format!("expert description batch has inconsistent dimensions (expected {dim})"),
            });
        }

        let vectors = pool
            .experts()
            .iter()
            .map(|e| e.expert_id.clone())
            .zip(embedded)
            .collect();

        debug!(experts = pool.len(), dim, "semantic selector initialized");

        Ok(Self {
            pool,
            cache,
            vectors,
            params,
            pins,
        })
    }
}

#[async_trait]
impl ExpertSelector for SemanticSelector {
    fn strategy(&self) -> SelectionStrategy {
        SelectionStrategy::Semantic
    }

    async fn select(&self, query: &str) -> Result<Vec<String>, MoeError> {
        let q = self
            .cache
            .embed_one(query)
            .await
            .map_err(|e| MoeError::Selection {
                message: format!("query embedding failed: {e}"),
            })?;

        let scored: Vec<ScoredExpert> = self
            .pool
            .experts()
            .iter()
            .map(|expert| {
                let similarity = self
                    .vectors
                    .get(&expert.expert_id)
                    .map_or(0.0, |v| cosine(&q, v));
                ScoredExpert {
                    expert_id: expert.expert_id.clone(),
                    similarity,
                    weighted_score: similarity * expert.weight,
                }
            })
            .collect();

        let ranked = rank(scored, &self.params);
        debug!(
            kept = ranked.len(),
            top = ranked.first().map(|s| s.expert_id.as_str()).unwrap_or(""),
            "semantic selection ranked"
        );

        let mut agents = expand_agents(&ranked, &self.pool, self.params.top_k_experts);
        apply_intent_pins(query, &mut agents, &self.pool, &self.pins);
        Ok(agents)
    }
}

impl std::fmt::Debug for SemanticSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticSelector")
            .field("experts", &self.pool.len())
            .field("params", &self.params)
            .finish()
    }
}
