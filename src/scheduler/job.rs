//! Work item definitions for the scheduler.
//!
//! - `WorkItem`: one request to run a pipeline step for a job
//! - `WorkResult`: what a worker reports after processing an item
//! - `WorkStatus`: final status of a processed item

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::pipeline::stage::PipelineStep;

/// Default maximum number of attempts for a work item.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A unit of work: run `step` of `job_id` with `payload`.
///
/// Items are serialized into the queue and processed by workers. Several
/// items for the same job and step may be in flight at once; the progress
/// store makes that safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier of this item (not of the job).
    pub id: Uuid,
    pub job_id: Uuid,
    pub step: PipelineStep,
    /// Stage handler input.
    #[serde(default)]
    pub payload: Value,
    /// Number of times this item has been attempted.
    #[serde(default)]
    pub attempts: u32,
    /// Attempts before the item is dead-lettered and its stage failed.
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    pub fn new(job_id: Uuid, step: PipelineStep, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            step,
            payload,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: Utc::now(),
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Increments the attempt counter. Called before each execution attempt.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Whether the item may be retried after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}

/// Final status of a processed work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// The step's artifact was accepted and the step completed.
    Completed,
    /// Regeneration was exhausted or retries ran out; the stage is failed.
    Failed,
    /// The job was already terminal (cancelled, failed or completed).
    Halted,
    /// The step had already been completed by another worker.
    Skipped,
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkStatus::Completed => write!(f, "completed"),
            WorkStatus::Failed => write!(f, "failed"),
            WorkStatus::Halted => write!(f, "halted"),
            WorkStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Result of processing a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub item_id: Uuid,
    pub job_id: Uuid,
    pub step: PipelineStep,
    pub status: WorkStatus,
    /// Repair strategy that produced the accepted artifact.
    #[serde(default)]
    pub strategy_used: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    pub worker_id: String,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl WorkResult {
    fn new(item: &WorkItem, status: WorkStatus, worker_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            item_id: item.id,
            job_id: item.job_id,
            step: item.step,
            status,
            strategy_used: None,
            error: None,
            worker_id: worker_id.into(),
            duration_ms,
            completed_at: Utc::now(),
        }
    }

    pub fn success(
        item: &WorkItem,
        worker_id: impl Into<String>,
        strategy_used: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let mut result = Self::new(item, WorkStatus::Completed, worker_id, duration_ms);
        result.strategy_used = Some(strategy_used.into());
        result
    }

    pub fn failure(
        item: &WorkItem,
        worker_id: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        let mut result = Self::new(item, WorkStatus::Failed, worker_id, duration_ms);
        result.error = Some(error.into());
        result
    }

    pub fn halted(item: &WorkItem, worker_id: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(item, WorkStatus::Halted, worker_id, duration_ms)
    }

    pub fn skipped(item: &WorkItem, worker_id: impl Into<String>, duration_ms: u64) -> Self {
        Self::new(item, WorkStatus::Skipped, worker_id, duration_ms)
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkStatus::Completed
    }
}

/// A work item that ran out of attempts, with the final error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub item: WorkItem,
    pub error: String,
    pub moved_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(item: WorkItem, error: impl Into<String>) -> Self {
        Self {
            item,
            error: error.into(),
            moved_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_work_item_new() {
        let job_id = Uuid::new_v4();
        let item = WorkItem::new(job_id, PipelineStep::Summarization, json!({"document_text": "x"}));

        assert!(!item.id.is_nil());
        assert_ne!(item.id, job_id);
        assert_eq!(item.attempts, 0);
        assert_eq!(item.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(item.should_retry());
    }

    #[test]
    fn test_work_item_attempts() {
        let mut item =
            WorkItem::new(Uuid::new_v4(), PipelineStep::Summarization, json!({})).with_max_attempts(2);

        assert_eq!(item.remaining_attempts(), 2);
        item.increment_attempts();
        assert!(item.should_retry());
        item.increment_attempts();
        assert!(!item.should_retry());
        assert_eq!(item.remaining_attempts(), 0);
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        let item = WorkItem::new(Uuid::new_v4(), PipelineStep::Summarization, json!({})).with_max_attempts(0);
        assert_eq!(item.max_attempts, 1);
    }

    #[test]
    fn test_work_item_wire_format() {
        let item = WorkItem::new(Uuid::new_v4(), PipelineStep::StructureAnalysis, json!({"summary": "s"}));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["step"], 3);

        let parsed: WorkItem = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_work_item_accepts_step_name() {
        let raw = json!({
            "id": Uuid::new_v4(),
            "job_id": Uuid::new_v4(),
            "step": "section_generation",
            "max_attempts": 3,
            "created_at": Utc::now(),
        });
        let item: WorkItem = serde_json::from_value(raw).unwrap();
        assert_eq!(item.step, PipelineStep::SectionGeneration);
        assert_eq!(item.payload, Value::Null);
        assert_eq!(item.attempts, 0);
    }

    #[test]
    fn test_work_results() {
        let item = WorkItem::new(Uuid::new_v4(), PipelineStep::Summarization, json!({}));

        let ok = WorkResult::success(&item, "worker-0", "critique-and-revise", 120);
        assert!(ok.is_success());
        assert_eq!(ok.strategy_used.as_deref(), Some("critique-and-revise"));
        assert_eq!(ok.job_id, item.job_id);

        let failed = WorkResult::failure(&item, "worker-0", "generation failed", 80);
        assert!(!failed.is_success());
        assert_eq!(failed.status.to_string(), "failed");

        assert_eq!(WorkResult::halted(&item, "worker-1", 1).status, WorkStatus::Halted);
        assert_eq!(WorkResult::skipped(&item, "worker-1", 1).status, WorkStatus::Skipped);
    }
}
