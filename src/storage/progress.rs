//! SQLite-backed progress store.
//!
//! The only writer of `jobs.stage` and `jobs.progress`. Every stage change
//! goes through one transaction that locks the job row, re-reads it, checks
//! the transition table, merges the step record and appends to the audit log.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::migrations::{MigrationError, MigrationRunner};
use super::models::{
    GenerationTrace, ItemCompletion, JobProgress, JobSnapshot, TraceFilter, TraceStatus,
    TransitionRecord,
};
use crate::metrics::{MetricsCollector, TransitionOutcome};
use crate::pipeline::stage::{target_stage, PipelineStep, Stage, StepStatus};
use crate::pipeline::transitions::{allowed_next, is_legal_transition};

/// Errors returned by the progress store.
#[derive(Debug, Error)]
pub enum ProgressError {
    /// The requested transition is not in the table. Nothing was written
    /// except the audit record.
    #[error(
        "Illegal transition for job {job_id}: {from} -> {to} (allowed: {})",
        format_stages(.allowed)
    )]
    IllegalTransition {
        job_id: Uuid,
        from: Stage,
        to: Stage,
        allowed: Vec<Stage>,
    },

    /// Work items can only be registered or completed while their step is
    /// at its `_init` or `_running` stage.
    #[error("Step {step} of job {job_id} is not open (stage {stage})")]
    StepNotOpen {
        job_id: Uuid,
        step: PipelineStep,
        stage: Stage,
    },

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// A persisted value could not be interpreted.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

fn format_stages(stages: &[Stage]) -> String {
    if stages.is_empty() {
        return "none".to_string();
    }
    stages.iter().map(Stage::as_str).collect::<Vec<_>>().join(", ")
}

/// A stage change requested against one job.
struct TransitionRequest<'a> {
    job_id: Uuid,
    step: Option<PipelineStep>,
    raw_status: &'a str,
    target: Stage,
    message: Option<&'a str>,
}

/// Durable record of job stages and progress.
#[derive(Clone)]
pub struct ProgressStore {
    pool: SqlitePool,
    metrics: MetricsCollector,
}

impl ProgressStore {
    /// Connects to a SQLite database, creating the file if needed.
    ///
    /// In-memory databases get a single long-lived connection so every
    /// caller sees the same data.
    pub async fn connect(database_url: &str) -> Result<Self, ProgressError> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| ProgressError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(10));
        if !in_memory {
            options = options
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| ProgressError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_pool(pool))
    }

    /// A fresh, migrated in-memory store.
    pub async fn in_memory() -> Result<Self, ProgressError> {
        let store = Self::connect("sqlite::memory:").await?;
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<Vec<String>, ProgressError> {
        Ok(MigrationRunner::new(self.pool.clone()).run_migrations().await?)
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Creates a job in the `pending` stage.
    pub async fn create_job(&self) -> Result<JobSnapshot, ProgressError> {
        self.create_job_with_id(Uuid::new_v4()).await
    }

    /// Creates a job with a caller-chosen id, such as the upload id of the
    /// source document.
    pub async fn create_job_with_id(&self, id: Uuid) -> Result<JobSnapshot, ProgressError> {
        let now = Utc::now();
        let progress = JobProgress::default();

        sqlx::query(
            "INSERT INTO jobs (id, stage, progress, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(Stage::Pending.as_str())
        .bind(serde_json::to_string(&progress)?)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!(job_id = %id, "Created job");

        Ok(JobSnapshot {
            id,
            stage: Stage::Pending,
            progress,
            created_at: now,
            updated_at: now,
        })
    }

    /// Read-only snapshot of a job.
    pub async fn get_job(&self, job_id: Uuid) -> Result<JobSnapshot, ProgressError> {
        let row = sqlx::query(
            "SELECT id, stage, progress, created_at, updated_at FROM jobs WHERE id = ?",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ProgressError::NotFound(job_id))?;

        job_from_row(&row)
    }

    /// Lists jobs, most recently updated first, optionally by stage.
    pub async fn list_jobs(
        &self,
        stage: Option<Stage>,
        limit: i64,
    ) -> Result<Vec<JobSnapshot>, ProgressError> {
        let rows = match stage {
            Some(stage) => {
                sqlx::query(
                    "SELECT id, stage, progress, created_at, updated_at FROM jobs
                     WHERE stage = ? ORDER BY updated_at DESC LIMIT ?",
                )
                .bind(stage.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, stage, progress, created_at, updated_at FROM jobs
                     ORDER BY updated_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(job_from_row).collect()
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Atomically applies a `(step, status)` report to a job.
    ///
    /// `raw_status` accepts the usual aliases (`done`, `in_progress`, ...).
    /// Returns the merged progress. Rejected transitions leave the job row
    /// unchanged and return [`ProgressError::IllegalTransition`].
    pub async fn advance_stage(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        raw_status: &str,
        message: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<JobProgress, ProgressError> {
        let status: StepStatus = raw_status.parse().map_err(ProgressError::InvalidStatus)?;
        let request = TransitionRequest {
            job_id,
            step: Some(step),
            raw_status,
            target: target_stage(step, status),
            message,
        };

        let (_, progress) = self
            .transition(request, |_, progress, now| {
                progress.merge_step(step, status, message, metadata.as_ref(), now)
            })
            .await?;
        Ok(progress)
    }

    /// Moves a non-terminal job to `cancelled`.
    pub async fn cancel_job(
        &self,
        job_id: Uuid,
        reason: Option<&str>,
    ) -> Result<JobSnapshot, ProgressError> {
        let request = TransitionRequest {
            job_id,
            step: None,
            raw_status: StepStatus::Cancelled.as_str(),
            target: Stage::Cancelled,
            message: reason,
        };

        self.transition(request, |from, progress, now| {
            if let Some(step) = from.step() {
                progress.merge_step(step, StepStatus::Cancelled, reason, None, now);
            }
        })
        .await?;

        tracing::info!(job_id = %job_id, "Cancelled job");
        self.get_job(job_id).await
    }

    /// Moves a terminal job back to `pending`, starting a new run with empty
    /// step records.
    pub async fn restart_job(&self, job_id: Uuid) -> Result<JobSnapshot, ProgressError> {
        let request = TransitionRequest {
            job_id,
            step: None,
            raw_status: "restart",
            target: Stage::Pending,
            message: None,
        };

        let (_, progress) = self
            .transition(request, |_, progress, _| progress.reset())
            .await?;

        tracing::info!(job_id = %job_id, run = progress.run, "Restarted job");
        self.get_job(job_id).await
    }

    /// The single write path for `stage` and `progress`.
    ///
    /// `update` receives the persisted stage and progress as read inside the
    /// transaction. Returns the stage the job moved from and the new progress.
    async fn transition<F>(
        &self,
        request: TransitionRequest<'_>,
        update: F,
    ) -> Result<(Stage, JobProgress), ProgressError>
    where
        F: FnOnce(Stage, &mut JobProgress, DateTime<Utc>) + Send,
    {
        let mut tx = self.pool.begin().await?;
        let (from, mut progress) = lock_job(&mut tx, request.job_id).await?;
        let now = Utc::now();

        if !is_legal_transition(from, request.target) {
            let allowed = allowed_next(from);
            let reason = format!("{} -> {} is not a legal transition", from, request.target);
            insert_audit(&mut tx, &request, from, false, Some(&reason), now).await?;
            tx.commit().await?;

            self.metrics
                .record_transition(request.target.as_str(), TransitionOutcome::Rejected);
            tracing::debug!(
                job_id = %request.job_id,
                from = %from,
                to = %request.target,
                "Rejected stage transition"
            );
            return Err(ProgressError::IllegalTransition {
                job_id: request.job_id,
                from,
                to: request.target,
                allowed,
            });
        }

        update(from, &mut progress, now);

        write_job(&mut tx, request.job_id, request.target, &progress, now).await?;
        insert_audit(&mut tx, &request, from, true, None, now).await?;
        tx.commit().await?;

        self.metrics
            .record_transition(request.target.as_str(), TransitionOutcome::Accepted);
        tracing::debug!(
            job_id = %request.job_id,
            from = %from,
            to = %request.target,
            "Advanced stage"
        );

        Ok((from, progress))
    }

    // =========================================================================
    // Work items
    // =========================================================================

    /// Registers work items with `step` so that the step completes only after
    /// all of them have. Keys already registered are left alone.
    ///
    /// The step must be open. The stage is not changed.
    pub async fn register_items(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        item_keys: &[String],
    ) -> Result<JobProgress, ProgressError> {
        let mut tx = self.pool.begin().await?;
        let (stage, mut progress) = lock_job(&mut tx, job_id).await?;
        ensure_step_open(job_id, step, stage)?;

        let added = progress.register_items(step, item_keys.iter().map(String::as_str));
        write_job(&mut tx, job_id, stage, &progress, Utc::now()).await?;
        tx.commit().await?;

        tracing::debug!(job_id = %job_id, step = %step, added = added, "Registered work items");
        Ok(progress)
    }

    /// Records one completed work item of `step`.
    ///
    /// When it was the last pending item the job moves to the step's
    /// `_complete` stage in the same transaction, with `metadata` and the
    /// item summary merged into the step record.
    pub async fn complete_item(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        item_key: &str,
        metadata: Value,
    ) -> Result<ItemCompletion, ProgressError> {
        let mut tx = self.pool.begin().await?;
        let (from, mut progress) = lock_job(&mut tx, job_id).await?;
        ensure_step_open(job_id, step, from)?;

        let now = Utc::now();
        let remaining = progress.complete_item(step, item_key, &metadata, now);
        if remaining > 0 {
            write_job(&mut tx, job_id, from, &progress, now).await?;
            tx.commit().await?;
            tracing::debug!(
                job_id = %job_id,
                step = %step,
                item = item_key,
                remaining = remaining,
                "Completed work item"
            );
            return Ok(ItemCompletion { remaining, progress });
        }

        let target = step.complete_stage();
        let request = TransitionRequest {
            job_id,
            step: Some(step),
            raw_status: StepStatus::Completed.as_str(),
            target,
            message: None,
        };
        if !is_legal_transition(from, target) {
            return Err(ProgressError::IllegalTransition {
                job_id,
                from,
                to: target,
                allowed: allowed_next(from),
            });
        }

        let step_metadata = progress.completion_metadata(step, &metadata);
        progress.merge_step(step, StepStatus::Completed, None, Some(&step_metadata), now);
        write_job(&mut tx, job_id, target, &progress, now).await?;
        insert_audit(&mut tx, &request, from, true, None, now).await?;
        tx.commit().await?;

        self.metrics
            .record_transition(target.as_str(), TransitionOutcome::Accepted);
        tracing::debug!(job_id = %job_id, from = %from, to = %target, "Advanced stage");

        Ok(ItemCompletion {
            remaining: 0,
            progress,
        })
    }

    /// The audit log of a job, oldest first.
    pub async fn list_transitions(
        &self,
        job_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, ProgressError> {
        let rows = sqlx::query(
            "SELECT id, job_id, step, raw_status, from_stage, to_stage, accepted, reason, message, created_at
             FROM stage_transitions WHERE job_id = ? ORDER BY id",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(TransitionRecord {
                    id: row.get("id"),
                    job_id: parse_uuid(row.get("job_id"))?,
                    step: parse_optional_step(row.get("step"))?,
                    raw_status: row.get("raw_status"),
                    from_stage: parse_stage(row.get("from_stage"))?,
                    to_stage: parse_stage(row.get("to_stage"))?,
                    accepted: row.get("accepted"),
                    reason: row.get("reason"),
                    message: row.get("message"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    // =========================================================================
    // Generation traces
    // =========================================================================

    pub async fn record_trace(&self, trace: &GenerationTrace) -> Result<(), ProgressError> {
        sqlx::query(
            "INSERT INTO generation_traces (id, job_id, step, status, strategy_used, attempts, issues, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(trace.id.to_string())
        .bind(trace.job_id.to_string())
        .bind(i64::from(trace.step.id()))
        .bind(trace.status.as_str())
        .bind(trace.strategy_used.as_deref())
        .bind(i64::from(trace.attempts))
        .bind(serde_json::to_string(&trace.issues)?)
        .bind(trace.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Traces matching `filter`, newest first.
    pub async fn list_traces(
        &self,
        filter: &TraceFilter,
    ) -> Result<Vec<GenerationTrace>, ProgressError> {
        let mut query = String::from(
            "SELECT id, job_id, step, status, strategy_used, attempts, issues, created_at
             FROM generation_traces",
        );

        let mut conditions = Vec::new();
        if filter.job_id.is_some() {
            conditions.push("job_id = ?");
        }
        if filter.step.is_some() {
            conditions.push("step = ?");
        }
        if filter.status.is_some() {
            conditions.push("status = ?");
        }
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY created_at DESC, rowid DESC");
        if filter.limit.is_some() {
            query.push_str(" LIMIT ?");
        }

        let mut sqlx_query = sqlx::query(&query);
        if let Some(job_id) = filter.job_id {
            sqlx_query = sqlx_query.bind(job_id.to_string());
        }
        if let Some(step) = filter.step {
            sqlx_query = sqlx_query.bind(i64::from(step.id()));
        }
        if let Some(status) = filter.status {
            sqlx_query = sqlx_query.bind(status.as_str());
        }
        if let Some(limit) = filter.limit {
            sqlx_query = sqlx_query.bind(limit);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.iter().map(trace_from_row).collect()
    }
}

/// Takes the job row's write lock and reads its stage and progress.
async fn lock_job(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: Uuid,
) -> Result<(Stage, JobProgress), ProgressError> {
    let job_key = job_id.to_string();

    // No-op write to take the write lock before the read.
    let locked = sqlx::query("UPDATE jobs SET stage = stage WHERE id = ?")
        .bind(&job_key)
        .execute(&mut **tx)
        .await?;
    if locked.rows_affected() == 0 {
        return Err(ProgressError::NotFound(job_id));
    }

    let row = sqlx::query("SELECT stage, progress FROM jobs WHERE id = ?")
        .bind(&job_key)
        .fetch_one(&mut **tx)
        .await?;
    let stage = parse_stage(row.get("stage"))?;
    let progress_json: String = row.get("progress");
    Ok((stage, serde_json::from_str(&progress_json)?))
}

async fn write_job(
    tx: &mut Transaction<'_, Sqlite>,
    job_id: Uuid,
    stage: Stage,
    progress: &JobProgress,
    now: DateTime<Utc>,
) -> Result<(), ProgressError> {
    sqlx::query("UPDATE jobs SET stage = ?, progress = ?, updated_at = ? WHERE id = ?")
        .bind(stage.as_str())
        .bind(serde_json::to_string(progress)?)
        .bind(now)
        .bind(job_id.to_string())
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn ensure_step_open(job_id: Uuid, step: PipelineStep, stage: Stage) -> Result<(), ProgressError> {
    if stage == step.init_stage() || stage == step.running_stage() {
        Ok(())
    } else {
        Err(ProgressError::StepNotOpen {
            job_id,
            step,
            stage,
        })
    }
}

async fn insert_audit(
    tx: &mut Transaction<'_, Sqlite>,
    request: &TransitionRequest<'_>,
    from: Stage,
    accepted: bool,
    reason: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(), ProgressError> {
    sqlx::query(
        "INSERT INTO stage_transitions
            (job_id, step, raw_status, from_stage, to_stage, accepted, reason, message, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(request.job_id.to_string())
    .bind(request.step.map(|step| i64::from(step.id())))
    .bind(request.raw_status)
    .bind(from.as_str())
    .bind(request.target.as_str())
    .bind(accepted)
    .bind(reason)
    .bind(request.message)
    .bind(now)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

fn job_from_row(row: &SqliteRow) -> Result<JobSnapshot, ProgressError> {
    let progress: String = row.get("progress");
    Ok(JobSnapshot {
        id: parse_uuid(row.get("id"))?,
        stage: parse_stage(row.get("stage"))?,
        progress: serde_json::from_str(&progress)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn trace_from_row(row: &SqliteRow) -> Result<GenerationTrace, ProgressError> {
    let status: String = row.get("status");
    let attempts: i64 = row.get("attempts");
    let issues: String = row.get("issues");

    Ok(GenerationTrace {
        id: parse_uuid(row.get("id"))?,
        job_id: parse_uuid(row.get("job_id"))?,
        step: parse_step(row.get("step"))?,
        status: status.parse::<TraceStatus>().map_err(ProgressError::InvalidData)?,
        strategy_used: row.get("strategy_used"),
        attempts: u32::try_from(attempts)
            .map_err(|_| ProgressError::InvalidData(format!("trace attempts {}", attempts)))?,
        issues: serde_json::from_str(&issues)?,
        created_at: row.get("created_at"),
    })
}

fn parse_uuid(raw: String) -> Result<Uuid, ProgressError> {
    Uuid::parse_str(&raw).map_err(|e| ProgressError::InvalidData(format!("job id '{}': {}", raw, e)))
}

fn parse_stage(raw: String) -> Result<Stage, ProgressError> {
    raw.parse().map_err(ProgressError::InvalidData)
}

fn parse_step(raw: i64) -> Result<PipelineStep, ProgressError> {
    u8::try_from(raw)
        .ok()
        .and_then(PipelineStep::from_id)
        .ok_or_else(|| ProgressError::InvalidData(format!("step id {}", raw)))
}

fn parse_optional_step(raw: Option<i64>) -> Result<Option<PipelineStep>, ProgressError> {
    raw.map(parse_step).transpose()
}
