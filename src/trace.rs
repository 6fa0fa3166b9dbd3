//! Per-request trace record.
//!
//! The orchestrator threads a [`TraceBuilder`] through the pipeline; each
//! stage records what it did, and the builder is sealed into an immutable
//! [`Trace`] exactly once at request exit. The sealed record is the
//! payload handed to the observability collaborator, so it serializes
//! cleanly and assumes machine consumers, not just humans.

use std::time::Instant;

use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::executor::{ExpertResult, ExpertStatus};
use crate::selector::SelectionStrategy;

/// Which branch of the pipeline produced the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPath {
    /// Bypass branch: a single lightweight agent answered.
    FastPath,
    /// Full pipeline: selection, execution, mixing.
    Moe,
    /// Final-resort branch: the fallback agent (or message) answered.
    Fallback,
}

/// One expert invocation as recorded in the trace.
#[derive(Debug, Clone, Serialize)]
pub struct ExpertTraceEntry {
    /// The invoked agent.
    pub agent_id: String,
    /// Terminal status of the invocation.
    pub status: ExpertStatus,
    /// Wall-clock latency of the invocation.
    pub latency_ms: u64,
}

impl From<&ExpertResult> for ExpertTraceEntry {
    fn from(result: &ExpertResult) -> Self {
        Self {
            agent_id: result.agent_id.clone(),
            status: result.status,
            latency_ms: result.latency_ms,
        }
    }
}

/// Immutable per-request observability record.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    /// Unique request identifier.
    pub request_id: String,
    /// The original query text.
    pub query: String,
    /// Pipeline branch that produced the response.
    pub path: RequestPath,
    /// Agents selected for execution (or the bypass agent).
    pub selected: Vec<String>,
    /// Per-expert invocation records, in selection order.
    pub per_expert: Vec<ExpertTraceEntry>,
    /// Strategy that produced the selection, when selection ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_strategy: Option<SelectionStrategy>,
    /// Whether the synthesis LLM produced the final text.
    pub synthesis_used: bool,
    /// Structured blocks guaranteed present in the response.
    pub preserved_block_count: usize,
    /// Total request wall-clock time.
    pub total_latency_ms: u64,
    /// Set iff the outcome was `fallback_failed` or `cancelled`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

/// Mutable builder threaded through one request.
#[derive(Debug)]
pub struct TraceBuilder {
    request_id: String,
    query: String,
    started: Instant,
    path: RequestPath,
    selected: Vec<String>,
    per_expert: Vec<ExpertTraceEntry>,
    selection_strategy: Option<SelectionStrategy>,
    synthesis_used: bool,
    preserved_block_count: usize,
    error: Option<ErrorKind>,
}

impl TraceBuilder {
    /// Starts a trace for a query, allocating the request id and the
    /// latency clock.
    #[must_use]
    pub fn new(query: &str) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            query: query.to_string(),
            started: Instant::now(),
            path: RequestPath::Moe,
            selected: Vec::new(),
            per_expert: Vec::new(),
            selection_strategy: None,
            synthesis_used: false,
            preserved_block_count: 0,
            error: None,
        }
    }

    /// The allocated request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Records the pipeline branch.
    pub const fn set_path(&mut self, path: RequestPath) {
        self.path = path;
    }

    /// Records the selected agents.
    pub fn set_selected(&mut self, selected: Vec<String>) {
        self.selected = selected;
    }

    /// Records which strategy produced the selection.
    pub const fn set_selection_strategy(&mut self, strategy: SelectionStrategy) {
        self.selection_strategy = Some(strategy);
    }

    /// Records one per-expert entry (used for the bypass invocation).
    pub fn push_expert(&mut self, entry: ExpertTraceEntry) {
        self.per_expert.push(entry);
    }

    /// Records the executor's results, after any bypass entry.
    pub fn record_results(&mut self, results: &[ExpertResult]) {
        self.per_expert
            .extend(results.iter().map(ExpertTraceEntry::from));
    }

    /// Records whether synthesis produced the final text.
    pub const fn set_synthesis_used(&mut self, used: bool) {
        self.synthesis_used = used;
    }

    /// Records the preserved-block count.
    pub const fn set_preserved_block_count(&mut self, count: usize) {
        self.preserved_block_count = count;
    }

    /// Records the terminal error, if any.
    pub const fn set_error(&mut self, error: ErrorKind) {
        self.error = Some(error);
    }

    /// Seals the builder into an immutable record.
    #[must_use]
    pub fn seal(self) -> Trace {
        Trace {
            request_id: self.request_id,
            query: self.query,
            path: self.path,
            selected: self.selected,
            per_expert: self.per_expert,
            selection_strategy: self.selection_strategy,
            synthesis_used: self.synthesis_used,
            preserved_block_count: self.preserved_block_count,
            total_latency_ms: u64::try_from(self.started.elapsed().as_millis())
                .unwrap_or(u64::MAX),
            error: self.error,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_seal_round_trip() {
        let mut builder = TraceBuilder::new("hello");
        builder.set_path(RequestPath::FastPath);
        builder.set_selected(vec!["chitchat".to_string()]);
        builder.push_expert(ExpertTraceEntry {
            agent_id: "chitchat".to_string(),
            status: ExpertStatus::Ok,
            latency_ms: 3,
        });

        let trace = builder.seal();
        assert_eq!(trace.path, RequestPath::FastPath);
        assert_eq!(trace.selected, vec!["chitchat"]);
        assert_eq!(trace.per_expert.len(), 1);
        assert!(trace.error.is_none());
        assert!(!trace.request_id.is_empty());
    }

    #[test]
    fn test_unique_request_ids() {
        let a = TraceBuilder::new("q").seal();
        let b = TraceBuilder::new("q").seal();
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_serialization_omits_empty_optionals() {
        let trace = TraceBuilder::new("q").seal();
        let json = serde_json::to_string(&trace).unwrap_or_default();
        assert!(json.contains("\"path\":\"moe\""));
        assert!(!json.contains("selection_strategy"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_serialization_includes_error_kind() {
        let mut builder = TraceBuilder::new("q");
        builder.set_path(RequestPath::Fallback);
        builder.set_error(ErrorKind::FallbackFailed);
        let json = serde_json::to_string(&builder.seal()).unwrap_or_default();
        assert!(json.contains("\"error\":\"fallback_failed\""));
        assert!(json.contains("\"path\":\"fallback\""));
    }
}
