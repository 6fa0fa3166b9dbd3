//! Bounded-concurrency expert executor.
//!
//! Launches every selected agent as a task gated by a semaphore, bounds
//! each invocation with a wall-clock timeout, and materializes every
//! outcome — success, timeout, or exception — into an [`ExpertResult`].
//! Nothing an agent does can propagate an error to the orchestrator.
//! Dropping the in-flight `execute` future aborts all outstanding tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::provider::AgentInvoker;

/// Maximum byte length of the `error_detail` carried in a result.
const MAX_ERROR_DETAIL_LEN: usize = 200;

/// Terminal status of one expert invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertStatus {
    /// Completed within budget.
    Ok,
    /// Wall-clock budget exceeded; the task was cancelled.
    Timeout,
    /// Invocation raised.
    Error,
}

/// Materialized outcome of one expert invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExpertResult {
    /// The invoked agent.
    pub agent_id: String,
    /// Terminal status.
    pub status: ExpertStatus,
    /// Agent output; empty on non-ok statuses.
    pub output: String,
    /// Wall-clock latency of the invocation.
    pub latency_ms: u64,
    /// Taxonomy entry for non-ok statuses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Short failure detail for non-ok statuses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ExpertResult {
    /// Whether the invocation completed successfully.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == ExpertStatus::Ok
    }

    fn ok(agent_id: String, output: String, latency_ms: u64) -> Self {
        Self {
            agent_id,
            status: ExpertStatus::Ok,
            output,
            latency_ms,
            error_kind: None,
            error_detail: None,
        }
    }

    fn timeout(agent_id: String, budget: Duration, latency_ms: u64) -> Self {
        Self {
            agent_id,
            status: ExpertStatus::Timeout,
            output: String::new(),
            latency_ms,
            error_kind: Some(ErrorKind::ExpertTimeout),
            error_detail: Some(format!("exceeded {:.1}s budget", budget.as_secs_f64())),
        }
    }

    fn error(agent_id: String, detail: &str, latency_ms: u64) -> Self {
        Self {
            agent_id,
            status: ExpertStatus::Error,
            output: String::new(),
            latency_ms,
            error_kind: Some(ErrorKind::ExpertError),
            error_detail: Some(truncate_detail(detail)),
        }
    }
}

fn truncate_detail(detail: &str) -> String {
    if detail.len() <= MAX_ERROR_DETAIL_LEN {
        return detail.to_string();
    }
    let mut cut = MAX_ERROR_DETAIL_LEN;
    while !detail.is_char_boundary(cut) {
        cut -= 1;
    }
    detail[..cut].to_string()
}

/// Launches selected agents with bounded concurrency.
pub struct ExpertExecutor {
    invoker: Arc<dyn AgentInvoker>,
}

impl ExpertExecutor {
    /// Creates an executor over the injected invoker.
    #[must_use]
    pub fn new(invoker: Arc<dyn AgentInvoker>) -> Self {
        Self { invoker }
    }

    /// Runs every agent against the query.
    ///
    /// The returned vector has the same length and order as `agent_ids`,
    /// regardless of completion order. Launch order matches input order up
    /// to semaphore availability.
    pub async fn execute(
        &self,
        agent_ids: &[String],
        query: &str,
        session_id: Option<&str>,
        per_expert_timeout: Duration,
        max_parallelism: usize,
    ) -> Vec<ExpertResult> {
        let semaphore = Arc::new(Semaphore::new(max_parallelism.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, agent_id) in agent_ids.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let invoker = Arc::clone(&self.invoker);
            let agent_id = agent_id.clone();
            let query = query.to_string();
            let session_id = session_id.map(str::to_string);

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (
                        idx,
                        ExpertResult::error(agent_id, "executor semaphore closed", 0),
                    );
                };

                let start = Instant::now();
                let outcome = tokio::time::timeout(
                    per_expert_timeout,
                    invoker.invoke(&agent_id, &query, session_id.as_deref()),
                )
                .await;
                let latency_ms =
                    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

                let result = match outcome {
                    Ok(Ok(output)) => {
                        debug!(agent = %agent_id, latency_ms, "expert completed");
                        ExpertResult::ok(agent_id, output, latency_ms)
                    }
                    Ok(Err(e)) => {
                        warn!(agent = %agent_id, error = %e, "expert raised");
                        ExpertResult::error(agent_id, &e.to_string(), latency_ms)
                    }
                    Err(_) => {
                        warn!(agent = %agent_id, latency_ms, "expert timed out");
                        ExpertResult::timeout(agent_id, per_expert_timeout, latency_ms)
                    }
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<ExpertResult>> = agent_ids.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => {
                    if let Some(slot) = slots.get_mut(idx) {
                        *slot = Some(result);
                    }
                }
                Err(e) => {
                    // The task itself died (panic or runtime abort); the
                    // affected index is unknown here, so the missing slot
                    // is filled below.
                    warn!(error = %e, "expert task join failed");
                }
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    ExpertResult::error(
                        agent_ids.get(idx).cloned().unwrap_or_default(),
                        "expert task did not complete",
                        0,
                    )
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ExpertExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpertExecutor").finish_non_exhaustive()
    }
}
