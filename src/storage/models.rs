//! Records persisted by the progress store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::pipeline::stage::{PipelineStep, Stage, StepStatus};
use crate::validation::ValidationIssue;

/// Per-step progress of one job, keyed by step id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: PipelineStep,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    /// Work items of the step keyed by item id. When any are registered the
    /// step completes only after all of them have.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub items: BTreeMap<String, ItemRecord>,
}

/// Completion state of one work item within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

impl ItemRecord {
    fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            finished_at: None,
            metadata: empty_object(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl StepRecord {
    fn new(step: PipelineStep) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            message: None,
            error: None,
            metadata: empty_object(),
            items: BTreeMap::new(),
        }
    }

    pub fn item_completed(&self, item_key: &str) -> bool {
        self.items.get(item_key).is_some_and(ItemRecord::is_completed)
    }

    /// Registered items that have not completed yet.
    pub fn pending_items(&self) -> usize {
        self.items.values().filter(|item| !item.is_completed()).count()
    }

    /// Step-level summary of the item records: the item count and whether
    /// any item was accepted in degraded form.
    fn items_summary(&self) -> Value {
        let degraded = self
            .items
            .values()
            .any(|item| item.metadata.get("degraded").and_then(Value::as_bool) == Some(true));
        serde_json::json!({ "items": self.items.len(), "degraded": degraded })
    }
}

/// The `progress` payload of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Incremented on every restart.
    #[serde(default)]
    pub run: u32,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
}

impl JobProgress {
    pub fn step(&self, step: PipelineStep) -> Option<&StepRecord> {
        self.steps.iter().find(|record| record.step == step)
    }

    /// Folds a status report into the record for `step`.
    ///
    /// A completed record keeps its status; otherwise the status only moves
    /// forward. `started_at` is set on the first non-pending report and
    /// `finished_at` on the first terminal one. Metadata objects are merged
    /// key by key.
    pub fn merge_step(
        &mut self,
        step: PipelineStep,
        status: StepStatus,
        message: Option<&str>,
        metadata: Option<&Value>,
        now: DateTime<Utc>,
    ) {
        let record = self.record_mut(step);

        let keeps_status = record.status == StepStatus::Completed
            || status.progress() < record.status.progress();
        if !keeps_status {
            record.status = status;
        }

        if record.started_at.is_none() && record.status != StepStatus::Pending {
            record.started_at = Some(now);
        }
        if record.finished_at.is_none() && record.status.progress() == StepStatus::Completed.progress() {
            record.finished_at = Some(now);
        }

        if let Some(message) = message {
            record.message = Some(message.to_string());
        }
        if status == StepStatus::Failed && !keeps_status {
            record.error = Some(message.unwrap_or("step failed").to_string());
        }

        if let Some(metadata) = metadata {
            merge_metadata(&mut record.metadata, metadata);
        }
    }

    /// Registers work items with `step`. Keys already present are left as
    /// they are. Returns how many keys were new.
    pub fn register_items<'a>(
        &mut self,
        step: PipelineStep,
        item_keys: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        let record = self.record_mut(step);
        let mut added = 0;
        for key in item_keys {
            if !record.items.contains_key(key) {
                record.items.insert(key.to_string(), ItemRecord::pending());
                added += 1;
            }
        }
        added
    }

    /// Marks one work item of `step` completed, registering it first if
    /// needed. Returns the number of items still pending.
    pub fn complete_item(
        &mut self,
        step: PipelineStep,
        item_key: &str,
        metadata: &Value,
        now: DateTime<Utc>,
    ) -> usize {
        let record = self.record_mut(step);
        let item = record
            .items
            .entry(item_key.to_string())
            .or_insert_with(ItemRecord::pending);
        if !item.is_completed() {
            item.status = StepStatus::Completed;
            item.finished_at = Some(now);
        }
        merge_metadata(&mut item.metadata, metadata);
        record.pending_items()
    }

    /// Metadata for the completion of `step`: `item_metadata` plus the item
    /// summary.
    pub fn completion_metadata(&self, step: PipelineStep, item_metadata: &Value) -> Value {
        let mut metadata = item_metadata.clone();
        if let Some(record) = self.step(step) {
            merge_metadata(&mut metadata, &record.items_summary());
        }
        metadata
    }

    fn record_mut(&mut self, step: PipelineStep) -> &mut StepRecord {
        let idx = match self.steps.iter().position(|record| record.step == step) {
            Some(idx) => idx,
            None => {
                self.steps.push(StepRecord::new(step));
                self.steps.sort_by_key(|record| record.step.id());
                self.steps
                    .iter()
                    .position(|record| record.step == step)
                    .unwrap_or(self.steps.len() - 1)
            }
        };
        &mut self.steps[idx]
    }

    /// Starts a new run with no step records.
    pub fn reset(&mut self) {
        self.run += 1;
        self.steps.clear();
    }
}

fn merge_metadata(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (key, value) in update {
                target.insert(key.clone(), value.clone());
            }
        }
        (target, update) => *target = update.clone(),
    }
}

/// Result of [`complete_item`](super::ProgressStore::complete_item).
#[derive(Debug, Clone, PartialEq)]
pub struct ItemCompletion {
    /// Items of the step still pending after this one.
    pub remaining: usize,
    pub progress: JobProgress,
}

impl ItemCompletion {
    /// Whether this item was the last one and the step moved to its
    /// `_complete` stage.
    pub fn step_completed(&self) -> bool {
        self.remaining == 0
    }
}

/// Read-only view of a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub stage: Stage,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attempted transition from the audit log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionRecord {
    pub id: i64,
    pub job_id: Uuid,
    pub step: Option<PipelineStep>,
    pub raw_status: String,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub accepted: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// How a regeneration engine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Accepted,
    Degraded,
    Exhausted,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Accepted => "accepted",
            TraceStatus::Degraded => "degraded",
            TraceStatus::Exhausted => "exhausted",
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accepted" => Ok(TraceStatus::Accepted),
            "degraded" => Ok(TraceStatus::Degraded),
            "exhausted" => Ok(TraceStatus::Exhausted),
            _ => Err(format!("unknown trace status '{}'", s)),
        }
    }
}

/// Observability record of one regeneration engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTrace {
    pub id: Uuid,
    pub job_id: Uuid,
    pub step: PipelineStep,
    pub status: TraceStatus,
    pub strategy_used: Option<String>,
    pub attempts: u32,
    pub issues: Vec<ValidationIssue>,
    pub created_at: DateTime<Utc>,
}

impl GenerationTrace {
    pub fn new(job_id: Uuid, step: PipelineStep, status: TraceStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            step,
            status,
            strategy_used: None,
            attempts: 0,
            issues: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy_used = Some(strategy.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_issues(mut self, issues: Vec<ValidationIssue>) -> Self {
        self.issues = issues;
        self
    }
}

/// Filter for [`list_traces`](super::ProgressStore::list_traces).
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    pub job_id: Option<Uuid>,
    pub step: Option<PipelineStep>,
    pub status: Option<TraceStatus>,
    pub limit: Option<i64>,
}

impl TraceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job_id(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    pub fn with_step(mut self, step: PipelineStep) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_status(mut self, status: TraceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}
