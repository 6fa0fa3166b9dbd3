//! Synthesis prompt template.
//!
//! The mixer renders successful expert outputs into a fixed template with
//! `{query}` and `{weighted_results}` placeholders and hands the result to
//! the synthesis LLM. The template's contract: one well-structured
//! markdown answer, every provided JSON block copied verbatim, nothing
//! invented beyond the expert outputs.

use std::fmt::Write;

/// Template handed to the synthesis LLM.
///
/// Placeholders: `{query}` (the original query) and `{weighted_results}`
/// (the rendered view of successful results, highest weight first).
pub const SYNTHESIS_TEMPLATE: &str = r#"You are the response mixer for a multi-expert assistant. Several specialist experts have answered the user's query; produce one coherent answer from their outputs.

## Instructions

1. Write a single well-structured markdown answer to the query.
2. Give more weight to experts listed first (they are sorted by weight and detail).
3. Copy every ```json code block from the expert outputs verbatim, byte for byte, into your answer — typically near the end. Never edit, reformat, or merge these blocks.
4. Do not invent content that is not supported by an expert output.
5. If experts disagree, present the better-supported view and note the disagreement briefly.

## Query

{query}

## Expert outputs

{weighted_results}"#;

/// One successful expert output as presented to the synthesis LLM.
#[derive(Debug, Clone, Copy)]
pub struct WeightedResult<'a> {
    /// Expert that produced the output (falls back to the agent id when
    /// the agent is not in the pool).
    pub expert_id: &'a str,
    /// The expert's weight.
    pub weight: f64,
    /// The raw output text.
    pub output: &'a str,
}

/// Renders the synthesis prompt from the template.
///
/// `results` must already be sorted by weight descending, then output
/// length descending; the renderer preserves the given order.
#[must_use]
pub fn build_synthesis_prompt(query: &str, results: &[WeightedResult<'_>]) -> String {
    let mut rendered = String::new();
    for r in results {
        let _ = write!(
            rendered,
            "### {expert} (weight {weight:.2})\n\n{output}\n\n",
            expert = r.expert_id,
            weight = r.weight,
            output = r.output,
        );
    }

    SYNTHESIS_TEMPLATE
        .replace("{query}", query)
        .replace("{weighted_results}", rendered.trim_end())
}
