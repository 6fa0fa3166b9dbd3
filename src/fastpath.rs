//! Fast-path detector for chitchat bypass.
//!
//! Classifies trivial greetings so the orchestrator can skip selection and
//! execution entirely, routing to a single lightweight agent. Two
//! substrategies run in order: an embedding comparison against a
//! precomputed chitchat description vector, then a small lexical regex set
//! used when no embedding provider is available or the embedding attempt
//! fails. Every internal failure means "no bypass", never an error.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tracing::debug;

use crate::config::MoeConfig;
use crate::embedding::{EmbeddingCache, cosine};
use crate::expert::ExpertPool;

/// Greeting/farewell/thanks patterns for the lexical fallback.
static CHITCHAT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*(hi|hiya|hello|hey|howdy|yo)[\s!,.?]*$",
        r"(?i)^\s*good\s+(morning|afternoon|evening|night)[\s!,.?]*$",
        r"(?i)^\s*(thanks|thank\s+you|thx|ty)[\s!,.?]*$",
        r"(?i)^\s*(bye|goodbye|farewell|see\s+you|later)[\s!,.?]*$",
        r"(?i)^\s*(how\s+are\s+you|how's\s+it\s+going|what's\s+up|sup)[\s!,.?]*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Embedding substrategy state: the query cache plus the precomputed
/// chitchat description vector.
struct EmbeddingStrategy {
    cache: Arc<EmbeddingCache>,
    chitchat: Arc<Vec<f32>>,
}

/// Decides whether a query bypasses the full pipeline.
pub struct FastPathDetector {
    enabled: bool,
    threshold: f64,
    timeout: Duration,
    embedding: Option<EmbeddingStrategy>,
}

impl FastPathDetector {
    /// Builds the detector.
    ///
    /// When a cache is available and the pool resolves a chitchat expert
    /// for the bypass agent, its capability description is embedded once
    /// here. Any failure during that warm-up simply disables the embedding
    /// substrategy; the lexical fallback still runs.
    pub async fn new(
        config: &MoeConfig,
        pool: &ExpertPool,
        cache: Option<Arc<EmbeddingCache>>,
    ) -> Self {
        let mut embedding = None;

        if config.fast_path_enabled
            && let Some(cache) = cache
            && let Some(expert) = pool.expert_for_agent_or_id(&config.bypass_agent_id)
        {
            match cache.embed_one(&expert.description()).await {
                Ok(chitchat) => {
                    debug!(
                        agent = %config.bypass_agent_id,
                        dim = chitchat.len(),
                        "fast-path chitchat embedding warmed"
                    );
                    embedding = Some(EmbeddingStrategy { cache, chitchat });
                }
                Err(e) => {
                    debug!(error = %e, "fast-path embedding warm-up failed; lexical only");
                }
            }
        }

        Self {
            enabled: config.fast_path_enabled,
            threshold: config.fast_path_threshold,
            timeout: config.fast_path_timeout(),
            embedding,
        }
    }

    /// Returns `true` when the query should bypass the full pipeline.
    pub async fn should_bypass(&self, query: &str) -> bool {
        if !self.enabled {
            return false;
        }

        if let Some(strategy) = &self.embedding {
            match tokio::time::timeout(self.timeout, strategy.cache.embed_one(query)).await {
                Ok(Ok(q)) => {
                    let similarity = cosine(&q, &strategy.chitchat);
                    debug!(similarity, threshold = self.threshold, "fast-path cosine");
                    return similarity >= self.threshold;
                }
                Ok(Err(e)) => {
                    debug!(error = %e, "fast-path embedding failed; using lexical fallback");
                }
                Err(_) => {
                    debug!("fast-path embedding timed out; using lexical fallback");
                }
            }
        }

        lexical_match(query)
    }
}

/// Lexical chitchat check against the compiled-in pattern set.
#[must_use]
pub fn lexical_match(query: &str) -> bool {
    CHITCHAT_PATTERNS.iter().any(|re| re.is_match(query))
}

impl std::fmt::Debug for FastPathDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastPathDetector")
            .field("enabled", &self.enabled)
            .field("threshold", &self.threshold)
            .field("embedding", &self.embedding.is_some())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use async_trait::async_trait;
    use test_case::test_case;

    use super::*;
    use crate::embedding::EmbeddingProvider;
    use crate::error::MoeError;
    use crate::expert::Expert;

    #[test_case("hello", true; "plain greeting")]
    #[test_case("  Hey!  ", true; "greeting with punctuation")]
    #[test_case("good morning", true; "time-of-day greeting")]
    #[test_case("thanks!", true; "thanks")]
    #[test_case("goodbye", true; "farewell")]
    #[test_case("how are you?", true; "pleasantry")]
    #[test_case("", false; "empty query")]
    #[test_case("   ", false; "whitespace only")]
    #[test_case("what is the price of TSLA", false; "substantive query")]
    #[test_case("hello, can you find restaurants nearby", false; "greeting prefix only")]
    fn test_lexical_match(query: &str, expected: bool) {
        assert_eq!(lexical_match(query), expected);
    }

    /// Provider returning a fixed "chitchat axis" vector for greeting-like
    /// texts and an orthogonal vector otherwise.
    struct AxisProvider;

    #[async_trait]
    impl EmbeddingProvider for AxisProvider {
        fn name(&self) -> &'static str {
            "axis"
        }

        async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MoeError> {
            let lowered = text.to_lowercase();
            if lowered.contains("greeting") || lowered.contains("hello") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }

        async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MoeError> {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                out.push(self.embed_one(t).await?);
            }
            Ok(out)
        }
    }

    fn pool() -> ExpertPool {
        ExpertPool::new(vec![Expert::new(
            "chitchat",
            vec!["chitchat".to_string()],
            vec!["greetings".to_string(), "small talk".to_string()],
        )])
        .unwrap_or_else(|e| panic!("pool failed: {e}"))
    }

    #[tokio::test]
    async fn test_embedding_strategy_bypasses_similar_query() {
        let cache = Arc::new(EmbeddingCache::new(Arc::new(AxisProvider), 16));
        let detector = FastPathDetector::new(&MoeConfig::default(), &pool(), Some(cache)).await;

        assert!(detector.should_bypass("hello there").await);
        assert!(!detector.should_bypass("quarterly earnings report").await);
    }

    #[tokio::test]
    async fn test_disabled_detector_never_bypasses() {
        let config = MoeConfig::default().with_fast_path_enabled(false);
        let detector = FastPathDetector::new(&config, &pool(), None).await;
        assert!(!detector.should_bypass("hello").await);
    }

    #[tokio::test]
    async fn test_lexical_fallback_without_provider() {
        let detector = FastPathDetector::new(&MoeConfig::default(), &pool(), None).await;
        assert!(detector.should_bypass("hello").await);
        assert!(!detector.should_bypass("find me a restaurant").await);
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_lexical() {
        struct DownProvider;

        #[async_trait]
        impl EmbeddingProvider for DownProvider {
            fn name(&self) -> &'static str {
                "down"
            }

            async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MoeError> {
                // Warm-up succeeds so the embedding strategy is armed,
                // then per-query calls fail.
                if text.starts_with("Expert for:") {
                    return Ok(vec![1.0, 0.0]);
                }
                Err(MoeError::EmbeddingUnavailable {
                    message: "down".to_string(),
                })
            }

            async fn embed_many(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, MoeError> {
                Err(MoeError::EmbeddingUnavailable {
                    message: "down".to_string(),
                })
            }
        }

        let cache = Arc::new(EmbeddingCache::new(Arc::new(DownProvider), 16));
        let detector = FastPathDetector::new(&MoeConfig::default(), &pool(), Some(cache)).await;

        // Embedding raises, lexical still classifies the greeting.
        assert!(detector.should_bypass("hello").await);
        assert!(!detector.should_bypass("price of TSLA").await);
    }
}
