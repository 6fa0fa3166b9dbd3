//! Expert pool definitions.
//!
//! An [`Expert`] is a logical specialist grouping one or more concrete
//! agent implementations. The [`ExpertPool`] is built once at orchestrator
//! startup and is immutable for its lifetime; selectors, the mixer, and
//! intent pinning all resolve against it.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::MoeError;

fn default_weight() -> f64 {
    1.0
}

/// A logical specialist with a capability list and a weight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expert {
    /// Unique identifier for this expert.
    pub expert_id: String,
    /// Concrete agent implementations, in invocation-preference order.
    pub agent_ids: Vec<String>,
    /// Free-text capabilities used for semantic descriptions and keyword
    /// matching.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Positive score multiplier applied during selection.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Expert {
    /// Creates an expert with the default weight.
    #[must_use]
    pub fn new(
        expert_id: impl Into<String>,
        agent_ids: Vec<String>,
        capabilities: Vec<String>,
    ) -> Self {
        Self {
            expert_id: expert_id.into(),
            agent_ids,
            capabilities,
            weight: default_weight(),
        }
    }

    /// Sets the weight, builder-style.
    #[must_use]
    pub const fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Synthesizes the textual description used for semantic scoring.
    #[must_use]
    pub fn description(&self) -> String {
        format!("Expert for: {}", self.capabilities.join(", "))
    }
}

/// Immutable pool of experts, validated at construction.
///
/// Shared read-only across concurrent requests; no interior mutability.
#[derive(Debug)]
pub struct ExpertPool {
    experts: Vec<Expert>,
    agents: HashSet<String>,
    agent_to_expert: HashMap<String, usize>,
}

impl ExpertPool {
    /// Builds a pool from expert definitions.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::Selection`] when an expert has an empty id, a
    /// duplicate id, no agents, or a non-positive or non-finite weight.
    /// An empty pool is permitted at construction; selectors reject it
    /// per-query.
    pub fn new(experts: Vec<Expert>) -> Result<Self, MoeError> {
        let mut seen_ids = HashSet::new();
        let mut agents = HashSet::new();
        let mut agent_to_expert = HashMap::new();

        for (idx, expert) in experts.iter().enumerate() {
            if expert.expert_id.trim().is_empty() {
                return Err(MoeError::Selection {
                    message: format!("expert at index {idx} has an empty expert_id"),
                });
            }
            if !seen_ids.insert(expert.expert_id.clone()) {
                return Err(MoeError::Selection {
                    message: format!("duplicate expert_id '{}'", expert.expert_id),
                });
            }
            if expert.agent_ids.is_empty() {
                return Err(MoeError::Selection {
                    message: format!("expert '{}' has no agent_ids", expert.expert_id),
                });
            }
            if !expert.weight.is_finite() || expert.weight <= 0.0 {
                return Err(MoeError::Selection {
                    message: format!(
                        "expert '{}' has invalid weight {}",
                        expert.expert_id, expert.weight
                    ),
                });
            }
            for agent_id in &expert.agent_ids {
                agents.insert(agent_id.clone());
                // First expert claiming an agent wins the weight lookup.
                agent_to_expert.entry(agent_id.clone()).or_insert(idx);
            }
        }

        Ok(Self {
            experts,
            agents,
            agent_to_expert,
        })
    }

    /// All experts in configured order.
    #[must_use]
    pub fn experts(&self) -> &[Expert] {
        &self.experts
    }

    /// Number of experts in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.experts.len()
    }

    /// Whether the pool has no experts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }

    /// Looks up an expert by id.
    #[must_use]
    pub fn get(&self, expert_id: &str) -> Option<&Expert> {
        self.experts.iter().find(|e| e.expert_id == expert_id)
    }

    /// Whether any expert exposes the given agent.
    #[must_use]
    pub fn contains_agent(&self, agent_id: &str) -> bool {
        self.agents.contains(agent_id)
    }

    /// The expert an agent belongs to (first claimant wins).
    #[must_use]
    pub fn expert_for_agent(&self, agent_id: &str) -> Option<&Expert> {
        self.agent_to_expert
            .get(agent_id)
            .and_then(|&idx| self.experts.get(idx))
    }

    /// The expert whose agents include `agent_id`, or whose own id matches
    /// it. Used to resolve the chitchat expert for the fast path.
    #[must_use]
    pub fn expert_for_agent_or_id(&self, agent_id: &str) -> Option<&Expert> {
        self.expert_for_agent(agent_id)
            .or_else(|| self.get(agent_id))
    }

    /// Lowercased tokens drawn from every capability string, plus the
    /// whole lowercased capability entries. Query tokens found here are
    /// exempt from stop-word removal.
    #[must_use]
    pub fn capability_vocabulary(&self) -> HashSet<String> {
        let mut vocab = HashSet::new();
        for expert in &self.experts {
            for cap in &expert.capabilities {
                let lowered = cap.to_lowercase();
                for token in lowered.split_whitespace() {
                    vocab.insert(token.to_string());
                }
                vocab.insert(lowered);
            }
        }
        vocab
    }
}
