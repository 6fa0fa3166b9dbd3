//! Structured-block extraction.
//!
//! Experts can carry JSON payloads (interactive maps and similar) inside
//! their textual output as ```` ```json ```` fenced blocks. The extractor
//! matches blocks by their exact source substring so re-injection never
//! reformats them; parsed values are used only for recognizing the block
//! type, deduplication, and presence checks after synthesis.

use serde_json::Value;

/// Opening fence marker for a JSON block.
const FENCE_OPEN: &str = "```json";
/// Closing fence marker.
const FENCE_CLOSE: &str = "```";

/// A JSON block lifted out of expert output.
#[derive(Debug, Clone)]
pub struct StructuredBlock {
    /// The exact source substring, fences included.
    pub raw: String,
    /// The parsed payload, used for structural comparison.
    pub value: Value,
}

impl PartialEq for StructuredBlock {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl StructuredBlock {
    /// The block's top-level `"type"` field.
    #[must_use]
    pub fn block_type(&self) -> Option<&str> {
        self.value.get("type").and_then(Value::as_str)
    }
}

/// Scans text for fenced JSON blocks whose payload is an object with a
/// recognized `"type"`. Blocks are returned in source order; unparseable
/// or unrecognized fences are skipped, and an unterminated fence ends the
/// scan.
#[must_use]
pub fn extract_blocks(text: &str, recognized_types: &[String]) -> Vec<StructuredBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(open_rel) = text[cursor..].find(FENCE_OPEN) {
        let open = cursor + open_rel;
        let body_start = open + FENCE_OPEN.len();
        let Some(close_rel) = text[body_start..].find(FENCE_CLOSE) else {
            break;
        };
        let close = body_start + close_rel;
        let raw_end = close + FENCE_CLOSE.len();

        let body = &text[body_start..close];
        if let Ok(value) = serde_json::from_str::<Value>(body)
            && value
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| recognized_types.iter().any(|r| r == t))
        {
            blocks.push(StructuredBlock {
                raw: text[open..raw_end].to_string(),
                value,
            });
        }

        cursor = raw_end;
    }

    blocks
}

/// Removes structurally-equal duplicates, keeping the first occurrence.
#[must_use]
pub fn dedupe_blocks(blocks: Vec<StructuredBlock>) -> Vec<StructuredBlock> {
    let mut unique: Vec<StructuredBlock> = Vec::with_capacity(blocks.len());
    for block in blocks {
        if !unique.iter().any(|b| b.value == block.value) {
            unique.push(block);
        }
    }
    unique
}

/// Wraps a JSON value in a fenced block, pretty-printed.
#[must_use]
pub fn render_block(value: &Value) -> String {
    let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    format!("{FENCE_OPEN}\n{body}\n{FENCE_CLOSE}")
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn map_types() -> Vec<String> {
        vec!["interactive_map".to_string()]
    }

    const MAP_BLOCK: &str = "```json\n{\"type\": \"interactive_map\", \"markers\": [{\"lat\": 37.77, \"lng\": -122.42}]}\n```";

    #[test]
    fn test_extract_single_block_raw_substring() {
        let text = format!("Here are the results:\n\n{MAP_BLOCK}\n\nEnjoy!");
        let blocks = extract_blocks(&text, &map_types());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw, MAP_BLOCK);
        assert_eq!(blocks[0].block_type(), Some("interactive_map"));
    }

    #[test]
    fn test_extract_skips_unrecognized_type() {
        let text = "```json\n{\"type\": \"chart\", \"series\": []}\n```";
        assert!(extract_blocks(text, &map_types()).is_empty());

        let both = vec!["interactive_map".to_string(), "chart".to_string()];
        assert_eq!(extract_blocks(text, &both).len(), 1);
    }

    #[test]
    fn test_extract_skips_invalid_json_and_continues() {
        let text = format!("```json\nnot json at all\n```\n{MAP_BLOCK}");
        let blocks = extract_blocks(&text, &map_types());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw, MAP_BLOCK);
    }

    #[test]
    fn test_extract_skips_non_object_payload() {
        let text = "```json\n[1, 2, 3]\n```";
        assert!(extract_blocks(text, &map_types()).is_empty());
    }

    #[test]
    fn test_extract_unterminated_fence() {
        let text = "```json\n{\"type\": \"interactive_map\"}";
        assert!(extract_blocks(text, &map_types()).is_empty());
    }

    #[test]
    fn test_extract_multiple_blocks_in_order() {
        let second = "```json\n{\"type\": \"interactive_map\", \"markers\": []}\n```";
        let text = format!("{MAP_BLOCK}\nand\n{second}");
        let blocks = extract_blocks(&text, &map_types());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].raw, MAP_BLOCK);
        assert_eq!(blocks[1].raw, second);
    }

    #[test]
    fn test_dedupe_by_structural_equality() {
        // Same structure, different formatting: dedup keeps the first raw.
        let reformatted =
            "```json\n{\"markers\": [{\"lng\": -122.42, \"lat\": 37.77}], \"type\": \"interactive_map\"}\n```";
        let text = format!("{MAP_BLOCK}\n{reformatted}");
        let blocks = dedupe_blocks(extract_blocks(&text, &map_types()));
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw, MAP_BLOCK);
    }

    #[test]
    fn test_dedupe_keeps_distinct_blocks() {
        let other = "```json\n{\"type\": \"interactive_map\", \"markers\": [{\"lat\": 1.0, \"lng\": 2.0}]}\n```";
        let text = format!("{MAP_BLOCK}\n{other}");
        let blocks = dedupe_blocks(extract_blocks(&text, &map_types()));
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn test_render_block_round_trips() {
        let value = serde_json::json!({"type": "interactive_map", "markers": []});
        let rendered = render_block(&value);
        let blocks = extract_blocks(&rendered, &map_types());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].value, value);
    }
}
