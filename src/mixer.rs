//! Result mixer: synthesis plus structured-block preservation.
//!
//! Produces one coherent answer from the successful expert results, with a
//! deterministic guarantee layered over the LLM: every structured block
//! extracted from a successful output appears in the final text, whatever
//! the synthesis model did with it. Synthesis failures optionally degrade
//! to concatenation instead of failing the request.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::blocks::{StructuredBlock, dedupe_blocks, extract_blocks, render_block};
use crate::config::MoeConfig;
use crate::error::MoeError;
use crate::executor::ExpertResult;
use crate::expert::ExpertPool;
use crate::prompt::{WeightedResult, build_synthesis_prompt};
use crate::provider::SynthesisLlm;
use crate::selector::intent_matches;

/// Block type targeted by the optional auto-inject step.
const MAP_BLOCK_TYPE: &str = "interactive_map";

/// Output of a mixing run.
#[derive(Debug, Clone)]
pub struct MixedResponse {
    /// The final answer text.
    pub text: String,
    /// Whether the synthesis LLM produced the text (`false` for degraded
    /// concatenation).
    pub synthesis_used: bool,
    /// Structured blocks guaranteed present in `text`.
    pub preserved_block_count: usize,
}

/// Mixes successful expert results into one response.
pub struct ResultMixer {
    synthesis: Arc<dyn SynthesisLlm>,
    pool: Arc<ExpertPool>,
    synthesis_timeout: Duration,
    preserved_block_types: Vec<String>,
    degrade_on_failure: bool,
    auto_inject_map: bool,
    map_vocabulary: Vec<String>,
}

impl ResultMixer {
    /// Creates a mixer from the config and collaborators.
    #[must_use]
    pub fn new(
        config: &MoeConfig,
        pool: Arc<ExpertPool>,
        synthesis: Arc<dyn SynthesisLlm>,
    ) -> Self {
        Self {
            synthesis,
            pool,
            synthesis_timeout: config.synthesis_timeout(),
            preserved_block_types: config.preserved_block_types.clone(),
            degrade_on_failure: config.degrade_on_synthesis_failure,
            auto_inject_map: config.auto_inject_map,
            map_vocabulary: config.map_pin.vocabulary.clone(),
        }
    }

    /// Mixes the successful results for a query.
    ///
    /// # Errors
    ///
    /// Returns [`MoeError::Synthesis`] when no result succeeded, or when
    /// synthesis fails and degraded concatenation is disabled.
    pub async fn mix(
        &self,
        query: &str,
        results: &[ExpertResult],
    ) -> Result<MixedResponse, MoeError> {
        let successful: Vec<&ExpertResult> = results.iter().filter(|r| r.is_ok()).collect();
        if successful.is_empty() {
            return Err(MoeError::Synthesis {
                message: "no successful expert results to mix".to_string(),
            });
        }

        // Step 1: extract structured blocks, first occurrence wins.
        let mut blocks = Vec::new();
        for result in &successful {
            blocks.extend(extract_blocks(&result.output, &self.preserved_block_types));
        }
        let blocks = dedupe_blocks(blocks);
        debug!(
            experts = successful.len(),
            blocks = blocks.len(),
            "mixing expert results"
        );

        // Step 2: synthesize.
        let prompt = self.render_prompt(query, &successful);
        let synthesized =
            tokio::time::timeout(self.synthesis_timeout, self.synthesis.synthesize(&prompt)).await;

        let (mut text, synthesis_used) = match synthesized {
            Ok(Ok(text)) => (text, true),
            Ok(Err(e)) => self.degrade(&successful, &e.to_string())?,
            Err(_) => self.degrade(
                &successful,
                &format!(
                    "synthesis exceeded {:.1}s budget",
                    self.synthesis_timeout.as_secs_f64()
                ),
            )?,
        };

        // Step 3: verify and re-inject anything the model dropped.
        let present = extract_blocks(&text, &self.preserved_block_types);
        for block in &blocks {
            if !present.iter().any(|p| p.value == block.value) {
                text.push_str("\n\n");
                text.push_str(&block.raw);
            }
        }

        let mut preserved_block_count = blocks.len();

        // Step 4: optional map auto-inject.
        if self.auto_inject_map
            && intent_matches(query, &self.map_vocabulary)
            && !has_map_block(&blocks)
            && let Some(injected) = synthesize_map_block(&successful)
        {
            debug!("auto-injecting synthesized map block");
            text.push_str("\n\n");
            text.push_str(&render_block(&injected));
            preserved_block_count += 1;
        }

        Ok(MixedResponse {
            text,
            synthesis_used,
            preserved_block_count,
        })
    }

    /// Renders the synthesis prompt with results sorted by expert weight
    /// descending, then output length descending.
    fn render_prompt(&self, query: &str, successful: &[&ExpertResult]) -> String {
        let mut weighted: Vec<WeightedResult<'_>> = successful
            .iter()
            .map(|r| {
                let (expert_id, weight) = self.pool.expert_for_agent(&r.agent_id).map_or(
                    (r.agent_id.as_str(), 1.0),
                    |expert| (expert.expert_id.as_str(), expert.weight),
                );
                WeightedResult {
                    expert_id,
                    weight,
                    output: &r.output,
                }
            })
            .collect();

        weighted.sort_by(|a, b| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.output.len().cmp(&a.output.len()))
        });

        build_synthesis_prompt(query, &weighted)
    }

    /// Degraded path: concatenate raw outputs separated by horizontal
    /// rules, or surface the synthesis error when degradation is off.
    fn degrade(
        &self,
        successful: &[&ExpertResult],
        reason: &str,
    ) -> Result<(String, bool), MoeError> {
        if !self.degrade_on_failure {
            return Err(MoeError::Synthesis {
                message: reason.to_string(),
            });
        }

        warn!(reason, "synthesis failed; concatenating raw outputs");
        let joined = successful
            .iter()
            .map(|r| r.output.as_str())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        Ok((joined, false))
    }
}

fn has_map_block(blocks: &[StructuredBlock]) -> bool {
    blocks
        .iter()
        .any(|b| b.block_type() == Some(MAP_BLOCK_TYPE))
}

/// Builds a minimal `interactive_map` block from location-like fields
/// (`lat`/`lng` pairs) found anywhere in the successful outputs' JSON
/// fences. Returns `None` when no coordinates are found.
fn synthesize_map_block(successful: &[&ExpertResult]) -> Option<Value> {
    let mut markers = Vec::new();

    for result in successful {
        for value in scan_json_values(&result.output) {
            collect_markers(&value, &mut markers);
        }
    }

    if markers.is_empty() {
        return None;
    }

    Some(json!({
        "type": MAP_BLOCK_TYPE,
        "markers": markers,
    }))
}

/// Parses every ```json fence in the text, regardless of `"type"`.
fn scan_json_values(text: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut cursor = 0;
    while let Some(open_rel) = text[cursor..].find("```json") {
        let body_start = cursor + open_rel + "```json".len();
        let Some(close_rel) = text[body_start..].find("```") else {
            break;
        };
        let close = body_start + close_rel;
        if let Ok(value) = serde_json::from_str::<Value>(&text[body_start..close]) {
            values.push(value);
        }
        cursor = close + 3;
    }
    values
}

/// Walks a JSON value collecting objects that carry numeric `lat` and
/// `lng` fields.
fn collect_markers(value: &Value, markers: &mut Vec<Value>) {
    match value {
        Value::Object(map) => {
            let lat = map.get("lat").and_then(Value::as_f64);
            let lng = map.get("lng").and_then(Value::as_f64);
            if let (Some(lat), Some(lng)) = (lat, lng) {
                let mut marker = serde_json::Map::new();
                marker.insert("lat".to_string(), json!(lat));
                marker.insert("lng".to_string(), json!(lng));
                if let Some(label) = map
                    .get("name")
                    .or_else(|| map.get("label"))
                    .or_else(|| map.get("title"))
                    .and_then(Value::as_str)
                {
                    marker.insert("label".to_string(), json!(label));
                }
                markers.push(Value::Object(marker));
            } else {
                for nested in map.values() {
                    collect_markers(nested, markers);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_markers(item, markers);
            }
        }
        _ => {}
    }
}

impl std::fmt::Debug for ResultMixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultMixer")
            .field("synthesis", &self.synthesis.name())
            .field("timeout", &self.synthesis_timeout)
            .field("degrade_on_failure", &self.degrade_on_failure)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::executor::ExpertStatus;
    use crate::expert::Expert;

    const MAP_BLOCK: &str = "```json\n{\"type\": \"interactive_map\", \"markers\": [{\"lat\": 37.77, \"lng\": -122.42}]}\n```";

    /// Synthesizer with scripted output or failure.
    struct ScriptedSynthesis {
        output: Option<String>,
        hang: bool,
        called: AtomicBool,
    }

    impl ScriptedSynthesis {
        fn returning(output: &str) -> Self {
            Self {
                output: Some(output.to_string()),
                hang: false,
                called: AtomicBool::new(false),
            }
        }

        fn failing() -> Self {
            Self {
                output: None,
                hang: false,
                called: AtomicBool::new(false),
            }
        }

        fn hanging() -> Self {
            Self {
                output: None,
                hang: true,
                called: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl SynthesisLlm for ScriptedSynthesis {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn synthesize(&self, _prompt: &str) -> Result<String, MoeError> {
            self.called.store(true, Ordering::SeqCst);
            if self.hang {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.output
                .clone()
                .ok_or_else(|| MoeError::Synthesis {
                    message: "scripted failure".to_string(),
                })
        }
    }

    fn pool() -> Arc<ExpertPool> {
        Arc::new(
            ExpertPool::new(vec![
                Expert::new(
                    "finance",
                    vec!["finance".to_string()],
                    vec!["stocks".to_string()],
                )
                .with_weight(2.0),
                Expert::new("maps", vec!["map".to_string()], vec!["maps".to_string()]),
            ])
            .unwrap_or_else(|e| panic!("pool failed: {e}")),
        )
    }

    fn ok_result(agent_id: &str, output: &str) -> ExpertResult {
        ExpertResult {
            agent_id: agent_id.to_string(),
            status: ExpertStatus::Ok,
            output: output.to_string(),
            latency_ms: 10,
            error_kind: None,
            error_detail: None,
        }
    }

    fn failed_result(agent_id: &str) -> ExpertResult {
        ExpertResult {
            agent_id: agent_id.to_string(),
            status: ExpertStatus::Error,
            output: String::new(),
            latency_ms: 5,
            error_kind: Some(crate::error::ErrorKind::ExpertError),
            error_detail: Some("boom".to_string()),
        }
    }

    fn mixer(synthesis: ScriptedSynthesis, config: &MoeConfig) -> ResultMixer {
        ResultMixer::new(config, pool(), Arc::new(synthesis))
    }

    #[tokio::test]
    async fn test_mix_uses_synthesis_output() {
        let config = MoeConfig::default();
        let mixer = mixer(ScriptedSynthesis::returning("The answer."), &config);
        let results = vec![ok_result("finance", "TSLA at $420.")];

        let mixed = mixer
            .mix("price of TSLA", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert_eq!(mixed.text, "The answer.");
        assert!(mixed.synthesis_used);
        assert_eq!(mixed.preserved_block_count, 0);
    }

    #[tokio::test]
    async fn test_mix_reinjects_dropped_block() {
        let config = MoeConfig::default();
        // The model "forgot" the block.
        let mixer = mixer(ScriptedSynthesis::returning("Here are your results."), &config);
        let results = vec![ok_result("map", &format!("Found 1 spot.\n{MAP_BLOCK}"))];

        let mixed = mixer
            .mix("greek restaurants on a map", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert!(mixed.text.contains(MAP_BLOCK));
        assert_eq!(mixed.preserved_block_count, 1);
    }

    #[tokio::test]
    async fn test_mix_no_duplicate_when_block_already_present() {
        let config = MoeConfig::default();
        let answer = format!("All set.\n\n{MAP_BLOCK}");
        let mixer = mixer(ScriptedSynthesis::returning(&answer), &config);
        let results = vec![ok_result("map", &format!("spots\n{MAP_BLOCK}"))];

        let mixed = mixer
            .mix("map it", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert_eq!(mixed.text.matches("interactive_map").count(), 1);
    }

    #[tokio::test]
    async fn test_mix_ignores_failed_results() {
        let config = MoeConfig::default();
        let mixer = mixer(ScriptedSynthesis::returning("ok"), &config);
        let results = vec![failed_result("finance"), ok_result("map", "found it")];

        let mixed = mixer
            .mix("query", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert!(mixed.synthesis_used);
    }

    #[tokio::test]
    async fn test_mix_errors_when_nothing_succeeded() {
        let config = MoeConfig::default();
        let mixer = mixer(ScriptedSynthesis::returning("ok"), &config);
        let results = vec![failed_result("finance")];
        assert!(matches!(
            mixer.mix("query", &results).await,
            Err(MoeError::Synthesis { .. })
        ));
    }

    #[tokio::test]
    async fn test_degraded_concatenation_preserves_blocks() {
        let config = MoeConfig::default();
        let mixer = mixer(ScriptedSynthesis::failing(), &config);
        let results = vec![
            ok_result("finance", "TSLA at $420."),
            ok_result("map", &format!("One spot:\n{MAP_BLOCK}")),
        ];

        let mixed = mixer
            .mix("query", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert!(!mixed.synthesis_used);
        assert!(mixed.text.contains("TSLA at $420."));
        assert!(mixed.text.contains("---"));
        assert!(mixed.text.contains(MAP_BLOCK));
        assert_eq!(mixed.preserved_block_count, 1);
    }

    #[tokio::test]
    async fn test_synthesis_failure_without_degradation_errors() {
        let config = MoeConfig::default().with_degrade_on_synthesis_failure(false);
        let mixer = mixer(ScriptedSynthesis::failing(), &config);
        let results = vec![ok_result("finance", "data")];
        assert!(matches!(
            mixer.mix("query", &results).await,
            Err(MoeError::Synthesis { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_timeout_degrades() {
        let config = MoeConfig::default().with_synthesis_timeout(Duration::from_millis(50));
        let mixer = mixer(ScriptedSynthesis::hanging(), &config);
        let results = vec![ok_result("finance", "data")];

        let mixed = mixer
            .mix("query", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert!(!mixed.synthesis_used);
        assert_eq!(mixed.text, "data");
    }

    #[tokio::test]
    async fn test_auto_inject_builds_map_from_coordinates() {
        let config = MoeConfig::default().with_auto_inject_map(true);
        let mixer = mixer(ScriptedSynthesis::returning("Found two spots."), &config);
        let business_output = "Spots:\n```json\n{\"results\": [{\"name\": \"Kokkari\", \"lat\": 37.797, \"lng\": -122.399}]}\n```";
        let results = vec![ok_result("finance", business_output)];

        let mixed = mixer
            .mix("show them on a map", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert!(mixed.text.contains("interactive_map"));
        assert!(mixed.text.contains("Kokkari"));
        assert_eq!(mixed.preserved_block_count, 1);
    }

    #[tokio::test]
    async fn test_auto_inject_off_by_default() {
        let config = MoeConfig::default();
        let mixer = mixer(ScriptedSynthesis::returning("Found spots."), &config);
        let business_output =
            "```json\n{\"results\": [{\"lat\": 1.0, \"lng\": 2.0}]}\n```";
        let results = vec![ok_result("finance", business_output)];

        let mixed = mixer
            .mix("show them on a map", &results)
            .await
            .unwrap_or_else(|e| panic!("mix failed: {e}"));
        assert!(!mixed.text.contains("interactive_map"));
    }

    #[test]
    fn test_collect_markers_nested() {
        let value = serde_json::json!({
            "data": {
                "places": [
                    {"name": "A", "lat": 1.0, "lng": 2.0},
                    {"name": "B", "address": "no coords"},
                    {"lat": 3.0, "lng": 4.0}
                ]
            }
        });
        let mut markers = Vec::new();
        collect_markers(&value, &mut markers);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].get("label").and_then(Value::as_str), Some("A"));
    }
}
