//! Pipeline orchestrator driving jobs through the stage table.
//!
//! This module provides the `PipelineOrchestrator` that coordinates:
//! - Idempotent stage initialization (shared by enqueue and workers)
//! - Stage handler invocation
//! - Quality gating through the regeneration engine
//! - Progress writes, traces and finalization

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::error::HandlerError;
use crate::llm::Generator;
use crate::metrics::{MetricsCollector, TransitionOutcome};
use crate::regeneration::{RegenerationEngine, RegenerationResult};
use crate::scheduler::job::WorkItem;
use crate::scheduler::queue::{QueueError, WorkQueue};
use crate::storage::{
    GenerationTrace, JobSnapshot, ProgressError, ProgressStore, TraceStatus,
};
use crate::validation::ValidationIssue;

use super::artifacts::default_handlers;
use super::config::{ConfigError, PipelineConfig};
use super::handler::StageHandler;
use super::stage::{PipelineStep, Stage};

/// Message shown to users when a stage runs out of repair strategies.
pub const GENERATION_FAILED_MESSAGE: &str = "generation failed, please retry";

/// Errors that can occur during pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Progress store error, including genuine illegal transitions.
    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The stage handler failed before producing an artifact.
    #[error("Handler for {step} failed: {source}")]
    Handler {
        step: PipelineStep,
        #[source]
        source: HandlerError,
    },

    #[error("No handler registered for {0}")]
    NoHandler(PipelineStep),

    #[error("No work queue configured")]
    QueueNotConfigured,

    /// A work item passed for registration belongs to another job or step.
    #[error("Work item {item_id} does not belong to job {job_id} step {step}")]
    ItemMismatch {
        item_id: Uuid,
        job_id: Uuid,
        step: PipelineStep,
    },
}

impl PipelineError {
    /// Whether another attempt of the same work item may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Handler { source, .. } => {
                !matches!(source, HandlerError::InvalidPayload(_))
            }
            PipelineError::Progress(ProgressError::Database(_))
            | PipelineError::Progress(ProgressError::ConnectionFailed(_)) => true,
            PipelineError::Queue(_) => true,
            _ => false,
        }
    }
}

/// Which call site is initializing a stage. Only affects logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOrigin {
    /// The caller enqueueing the work item.
    Primary,
    /// A worker about to run the stage.
    Fallback,
}

impl std::fmt::Display for InitOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InitOrigin::Primary => write!(f, "primary"),
            InitOrigin::Fallback => write!(f, "fallback"),
        }
    }
}

/// Result of [`PipelineOrchestrator::initialize_stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// This call moved the job to the step's `_init` stage.
    Initialized,
    /// The job was already at or past the `_init` stage; nothing was written.
    AlreadyInitialized { stage: Stage },
    /// Another writer initialized the stage between our read and write.
    BenignRace { stage: Stage },
    /// The job is terminal.
    Halted { stage: Stage },
}

/// Result of running one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed {
        strategy_used: String,
        attempts: u32,
        degraded: bool,
        /// Set when this item was the step's last pending item and the job
        /// moved to the step's `_complete` stage.
        step_completed: bool,
        /// Set when this call also moved the job to `completed`.
        finalized: bool,
    },
    /// Regeneration was exhausted; the job is now `failed`.
    Failed {
        error: String,
        issues: Vec<ValidationIssue>,
    },
    /// The job was terminal when we tried to write.
    Halted { stage: Stage },
    /// This item, or the whole step, was already completed.
    Skipped { stage: Stage },
}

impl StageOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            StageOutcome::Completed { .. } => "completed",
            StageOutcome::Failed { .. } => "failed",
            StageOutcome::Halted { .. } => "halted",
            StageOutcome::Skipped { .. } => "skipped",
        }
    }
}

/// Statistics about stage runs handled by this orchestrator.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorStats {
    /// Total number of stage runs that reached an outcome.
    pub total_runs: u64,
    pub completed: u64,
    pub failed: u64,
    pub halted: u64,
    pub skipped: u64,
    /// Completed runs whose artifact was a synthesized placeholder.
    pub degraded: u64,
    /// Rejected writes classified as races with another worker.
    pub benign_races: u64,
    pub average_duration: Duration,
}

impl OrchestratorStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&mut self, outcome: &StageOutcome, duration: Duration) {
        self.total_runs += 1;
        match outcome {
            StageOutcome::Completed { degraded, .. } => {
                self.completed += 1;
                if *degraded {
                    self.degraded += 1;
                }
            }
            StageOutcome::Failed { .. } => self.failed += 1,
            StageOutcome::Halted { .. } => self.halted += 1,
            StageOutcome::Skipped { .. } => self.skipped += 1,
        }
        self.update_average_duration(duration);
    }

    /// Updates the running average duration.
    fn update_average_duration(&mut self, duration: Duration) {
        if self.total_runs == 1 {
            self.average_duration = duration;
        } else {
            // Incremental average: avg = avg + (new - avg) / n
            let n = self.total_runs as f64;
            let old_avg = self.average_duration.as_secs_f64();
            let new_val = duration.as_secs_f64();
            let new_avg = old_avg + (new_val - old_avg) / n;
            self.average_duration = Duration::from_secs_f64(new_avg.max(0.0));
        }
    }

    /// Fraction of runs that completed.
    pub fn completion_rate(&self) -> f64 {
        if self.total_runs == 0 {
            0.0
        } else {
            self.completed as f64 / self.total_runs as f64
        }
    }
}

/// How a rejected write relates to the stage we wanted.
enum Rejection {
    /// The job is terminal.
    Halted(Stage),
    /// The job already moved past the target. Another worker got there first.
    Ahead(Stage),
}

/// Coordinates stage handlers, the regeneration engine and the progress store.
pub struct PipelineOrchestrator {
    store: ProgressStore,
    engine: Arc<RegenerationEngine>,
    handlers: HashMap<PipelineStep, Arc<dyn StageHandler>>,
    queue: Option<Arc<dyn WorkQueue>>,
    max_stage_attempts: u32,
    metrics: MetricsCollector,
    stats: Arc<tokio::sync::RwLock<OrchestratorStats>>,
}

impl PipelineOrchestrator {
    pub fn new(store: ProgressStore, engine: RegenerationEngine) -> Self {
        Self {
            store,
            engine: Arc::new(engine),
            handlers: HashMap::new(),
            queue: None,
            max_stage_attempts: crate::scheduler::job::DEFAULT_MAX_ATTEMPTS,
            metrics: MetricsCollector::new(),
            stats: Arc::new(tokio::sync::RwLock::new(OrchestratorStats::new())),
        }
    }

    /// Builds an orchestrator with the default generator-backed handlers.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Config` if the configuration is invalid.
    pub fn from_config(
        config: &PipelineConfig,
        store: ProgressStore,
        generator: Arc<dyn Generator>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let engine = RegenerationEngine::new(config.regeneration_config())
            .with_generator(Arc::clone(&generator));

        Ok(Self::new(store, engine)
            .with_handlers(default_handlers(generator, config.generation_options()))
            .with_max_stage_attempts(config.max_stage_attempts))
    }

    /// Registers a handler, replacing any previous handler for its step.
    pub fn with_handler(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.handlers.insert(handler.step(), handler);
        self
    }

    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Arc<dyn StageHandler>>) -> Self {
        for handler in handlers {
            self.handlers.insert(handler.step(), handler);
        }
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Attempts given to work items created by [`Self::enqueue_stage`].
    pub fn with_max_stage_attempts(mut self, attempts: u32) -> Self {
        self.max_stage_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn queue(&self) -> Option<&Arc<dyn WorkQueue>> {
        self.queue.as_ref()
    }

    pub fn has_handler(&self, step: PipelineStep) -> bool {
        self.handlers.contains_key(&step)
    }

    pub async fn stats(&self) -> OrchestratorStats {
        self.stats.read().await.clone()
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Moves the job to `step`'s `_init` stage unless it is already there or
    /// beyond.
    ///
    /// Safe to call from several places at once: a rejected write where the
    /// persisted stage already reached the target is reported as
    /// [`InitOutcome::BenignRace`], not an error.
    pub async fn initialize_stage(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        origin: InitOrigin,
    ) -> Result<InitOutcome, PipelineError> {
        let target = step.init_stage();
        let job = self.store.get_job(job_id).await?;

        if job.stage.is_terminal() {
            tracing::info!(
                job_id = %job_id,
                step = %step,
                stage = %job.stage,
                origin = %origin,
                "Job is terminal, not initializing stage"
            );
            return Ok(InitOutcome::Halted { stage: job.stage });
        }

        if job.stage.rank() >= target.rank() {
            tracing::debug!(
                job_id = %job_id,
                step = %step,
                stage = %job.stage,
                origin = %origin,
                "Stage already initialized"
            );
            return Ok(InitOutcome::AlreadyInitialized { stage: job.stage });
        }

        match self.store.advance_stage(job_id, step, "pending", None, None).await {
            Ok(_) => {
                tracing::info!(job_id = %job_id, step = %step, origin = %origin, "Initialized stage");
                Ok(InitOutcome::Initialized)
            }
            Err(err) => match self.classify_rejection(err, target)? {
                Rejection::Halted(stage) => Ok(InitOutcome::Halted { stage }),
                Rejection::Ahead(stage) => {
                    self.note_benign_race(job_id, step, target, stage, origin).await;
                    Ok(InitOutcome::BenignRace { stage })
                }
            },
        }
    }

    /// Initializes `step` and enqueues a work item for it.
    ///
    /// Returns `None` when the job is terminal or the step already completed.
    pub async fn enqueue_stage(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        payload: Value,
    ) -> Result<Option<WorkItem>, PipelineError> {
        Ok(self.enqueue_stage_batch(job_id, step, vec![payload]).await?.pop())
    }

    /// Initializes `step` and enqueues one work item per payload, such as one
    /// per source document. The step completes once every item has.
    ///
    /// Returns no items when the job is terminal or the step already
    /// completed. Items are registered before they are enqueued; if enqueueing
    /// fails, the returned error leaves the step waiting for them.
    pub async fn enqueue_stage_batch(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        payloads: Vec<Value>,
    ) -> Result<Vec<WorkItem>, PipelineError> {
        let queue = self.queue.as_ref().ok_or(PipelineError::QueueNotConfigured)?;
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let items: Vec<WorkItem> = payloads
            .into_iter()
            .map(|payload| {
                WorkItem::new(job_id, step, payload).with_max_attempts(self.max_stage_attempts)
            })
            .collect();

        if !self.register_items(job_id, step, &items).await? {
            return Ok(Vec::new());
        }

        for item in &items {
            queue.enqueue(item.clone()).await?;
        }

        tracing::info!(job_id = %job_id, step = %step, items = items.len(), "Enqueued stage");
        Ok(items)
    }

    /// Initializes `step` and registers `items` with it, so the step is only
    /// completed after each of them has run.
    ///
    /// Items run without registration complete the step on their own. Returns
    /// `false` when nothing was registered because the job is terminal or the
    /// step already completed.
    pub async fn register_items(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        items: &[WorkItem],
    ) -> Result<bool, PipelineError> {
        if let Some(item) = items
            .iter()
            .find(|item| item.job_id != job_id || item.step != step)
        {
            return Err(PipelineError::ItemMismatch {
                item_id: item.id,
                job_id,
                step,
            });
        }

        if let InitOutcome::Halted { .. } = self.initialize_stage(job_id, step, InitOrigin::Primary).await? {
            return Ok(false);
        }

        let keys: Vec<String> = items.iter().map(|item| item.id.to_string()).collect();
        match self.store.register_items(job_id, step, &keys).await {
            Ok(_) => Ok(true),
            Err(err) => match self.classify_rejection(err, step.complete_stage())? {
                Rejection::Halted(stage) | Rejection::Ahead(stage) => {
                    tracing::info!(job_id = %job_id, step = %step, stage = %stage, "Step closed, items not registered");
                    Ok(false)
                }
            },
        }
    }

    // =========================================================================
    // Stage execution
    // =========================================================================

    /// Runs one work item to an outcome.
    ///
    /// Errors are stage-attempt failures; the caller decides whether to retry
    /// using [`PipelineError::is_retryable`].
    pub async fn run_stage(&self, item: &WorkItem) -> Result<StageOutcome, PipelineError> {
        let start = Instant::now();
        let result = self.run_stage_inner(item).await;
        let duration = start.elapsed();

        match &result {
            Ok(outcome) => {
                self.metrics
                    .record_stage(item.step.as_str(), outcome.status(), duration.as_secs_f64());
                self.stats.write().await.record(outcome, duration);
            }
            Err(err) => {
                self.metrics
                    .record_stage(item.step.as_str(), "error", duration.as_secs_f64());
                tracing::warn!(
                    job_id = %item.job_id,
                    step = %item.step,
                    error = %err,
                    retryable = err.is_retryable(),
                    "Stage attempt failed"
                );
            }
        }

        result
    }

    async fn run_stage_inner(&self, item: &WorkItem) -> Result<StageOutcome, PipelineError> {
        let job_id = item.job_id;
        let step = item.step;

        if !step.is_work_step() {
            return self.finalize(job_id).await;
        }

        let handler = self
            .handlers
            .get(&step)
            .cloned()
            .ok_or(PipelineError::NoHandler(step))?;

        if let InitOutcome::Halted { stage } =
            self.initialize_stage(job_id, step, InitOrigin::Fallback).await?
        {
            return Ok(StageOutcome::Halted { stage });
        }

        let current = self.store.get_job(job_id).await?;
        let item_key = item.id.to_string();
        if current
            .progress
            .step(step)
            .is_some_and(|record| record.item_completed(&item_key))
        {
            tracing::info!(job_id = %job_id, step = %step, item_id = %item.id, "Work item already completed");
            return Ok(StageOutcome::Skipped {
                stage: current.stage,
            });
        }

        // Other items of the step may have marked it running already.
        if current.stage != step.running_stage() {
            if let Some(outcome) = self.mark_running(job_id, step).await? {
                return Ok(outcome);
            }
        }

        let job = self.store.get_job(job_id).await?;
        tracing::info!(job_id = %job_id, step = %step, attempt = item.attempts, "Running stage");

        let raw = handler
            .handle(&job, &item.payload)
            .await
            .map_err(|source| PipelineError::Handler { step, source })?;

        let result = self
            .engine
            .regenerate_default(&raw.output, &raw.prompt, &handler.artifact_schema())
            .await;

        match result {
            RegenerationResult::Success {
                artifact,
                strategy_used,
                attempts,
                degraded,
            } => {
                self.accept(&job, item, handler.as_ref(), &artifact, &strategy_used, attempts, degraded)
                    .await
            }
            RegenerationResult::Failure {
                error,
                issues,
                attempts_exhausted,
            } => self.exhaust(job_id, step, error, issues, attempts_exhausted).await,
        }
    }

    /// Moves the job to the step's running stage.
    ///
    /// Returns an outcome when the stage must not run.
    async fn mark_running(
        &self,
        job_id: Uuid,
        step: PipelineStep,
    ) -> Result<Option<StageOutcome>, PipelineError> {
        let target = step.running_stage();
        match self.store.advance_stage(job_id, step, "running", None, None).await {
            Ok(_) => Ok(None),
            Err(err) => match self.classify_rejection(err, target)? {
                Rejection::Halted(stage) => Ok(Some(StageOutcome::Halted { stage })),
                Rejection::Ahead(stage) if stage.rank() >= step.complete_stage().rank() => {
                    tracing::warn!(
                        job_id = %job_id,
                        step = %step,
                        stage = %stage,
                        "Step completed without this work item; register items before running them"
                    );
                    Ok(Some(StageOutcome::Skipped { stage }))
                }
                Rejection::Ahead(stage) => {
                    // Another worker is running the same step; both may finish.
                    self.note_benign_race(job_id, step, target, stage, InitOrigin::Fallback)
                        .await;
                    Ok(None)
                }
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn accept(
        &self,
        job: &JobSnapshot,
        item: &WorkItem,
        handler: &dyn StageHandler,
        artifact: &Value,
        strategy_used: &str,
        attempts: u32,
        degraded: bool,
    ) -> Result<StageOutcome, PipelineError> {
        let step = handler.step();

        handler
            .on_accepted(job, artifact)
            .await
            .map_err(|source| PipelineError::Handler { step, source })?;

        let status = if degraded {
            TraceStatus::Degraded
        } else {
            TraceStatus::Accepted
        };
        self.write_trace(
            GenerationTrace::new(job.id, step, status)
                .with_strategy(strategy_used)
                .with_attempts(attempts),
        )
        .await;

        let metadata = json!({
            "strategy_used": strategy_used,
            "attempts": attempts,
            "degraded": degraded,
        });
        let target = step.complete_stage();

        let completion = match self
            .store
            .complete_item(job.id, step, &item.id.to_string(), metadata)
            .await
        {
            Ok(completion) => completion,
            Err(err) => {
                return match self.classify_rejection(err, target)? {
                    Rejection::Halted(stage) => Ok(StageOutcome::Halted { stage }),
                    Rejection::Ahead(stage) => {
                        self.note_benign_race(job.id, step, target, stage, InitOrigin::Fallback)
                            .await;
                        Ok(StageOutcome::Skipped { stage })
                    }
                };
            }
        };

        if !completion.step_completed() {
            tracing::info!(
                job_id = %job.id,
                step = %step,
                item_id = %item.id,
                strategy = %strategy_used,
                remaining = completion.remaining,
                "Completed work item"
            );
            return Ok(StageOutcome::Completed {
                strategy_used: strategy_used.to_string(),
                attempts,
                degraded,
                step_completed: false,
                finalized: false,
            });
        }

        if degraded {
            tracing::warn!(job_id = %job.id, step = %step, "Completed stage with a degraded artifact");
        } else {
            tracing::info!(
                job_id = %job.id,
                step = %step,
                strategy = %strategy_used,
                attempts = attempts,
                "Completed stage"
            );
        }

        let finalized = match step.next() {
            Some(next) if !next.is_work_step() => {
                matches!(self.finalize(job.id).await?, StageOutcome::Completed { .. })
            }
            _ => false,
        };

        Ok(StageOutcome::Completed {
            strategy_used: strategy_used.to_string(),
            attempts,
            degraded,
            step_completed: true,
            finalized,
        })
    }

    async fn exhaust(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        error: String,
        issues: Vec<ValidationIssue>,
        attempts: u32,
    ) -> Result<StageOutcome, PipelineError> {
        tracing::error!(
            job_id = %job_id,
            step = %step,
            issues = issues.len(),
            attempts = attempts,
            error = %error,
            "Regeneration exhausted"
        );

        self.write_trace(
            GenerationTrace::new(job_id, step, TraceStatus::Exhausted)
                .with_attempts(attempts)
                .with_issues(issues.clone()),
        )
        .await;

        let metadata = json!({
            "error": error,
            "issues": issues,
            "attempts": attempts,
        });

        match self
            .store
            .advance_stage(job_id, step, "failed", Some(GENERATION_FAILED_MESSAGE), Some(metadata))
            .await
        {
            Ok(_) => Ok(StageOutcome::Failed { error, issues }),
            Err(err) => match self.classify_rejection(err, Stage::Failed)? {
                Rejection::Halted(stage) | Rejection::Ahead(stage) => {
                    Ok(StageOutcome::Halted { stage })
                }
            },
        }
    }

    /// Moves a job whose last work step completed to `completed`.
    pub async fn finalize(&self, job_id: Uuid) -> Result<StageOutcome, PipelineError> {
        let step = PipelineStep::Finalization;

        match self.initialize_stage(job_id, step, InitOrigin::Fallback).await? {
            InitOutcome::Halted {
                stage: Stage::Completed,
            } => return Ok(StageOutcome::Skipped { stage: Stage::Completed }),
            InitOutcome::Halted { stage } => return Ok(StageOutcome::Halted { stage }),
            _ => {}
        }

        match self.store.advance_stage(job_id, step, "completed", None, None).await {
            Ok(_) => {
                tracing::info!(job_id = %job_id, "Job completed");
                Ok(StageOutcome::Completed {
                    strategy_used: "none".to_string(),
                    attempts: 0,
                    degraded: false,
                    step_completed: true,
                    finalized: true,
                })
            }
            Err(err) => match self.classify_rejection(err, Stage::Completed)? {
                Rejection::Halted(Stage::Completed) => {
                    Ok(StageOutcome::Skipped { stage: Stage::Completed })
                }
                Rejection::Halted(stage) | Rejection::Ahead(stage) => {
                    Ok(StageOutcome::Halted { stage })
                }
            },
        }
    }

    /// Marks `step` failed after its work item ran out of attempts.
    ///
    /// A job that is already terminal is left alone.
    pub async fn fail_stage(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        error: &str,
    ) -> Result<(), PipelineError> {
        let metadata = json!({ "error": error });
        match self
            .store
            .advance_stage(job_id, step, "failed", Some(GENERATION_FAILED_MESSAGE), Some(metadata))
            .await
        {
            Ok(_) => {
                tracing::error!(job_id = %job_id, step = %step, error = %error, "Stage failed");
                Ok(())
            }
            Err(err) => match self.classify_rejection(err, Stage::Failed)? {
                Rejection::Halted(stage) | Rejection::Ahead(stage) => {
                    tracing::info!(job_id = %job_id, step = %step, stage = %stage, "Job already terminal, not failing stage");
                    Ok(())
                }
            },
        }
    }

    pub async fn cancel_job(
        &self,
        job_id: Uuid,
        reason: Option<&str>,
    ) -> Result<JobSnapshot, PipelineError> {
        Ok(self.store.cancel_job(job_id, reason).await?)
    }

    pub async fn restart_job(&self, job_id: Uuid) -> Result<JobSnapshot, PipelineError> {
        Ok(self.store.restart_job(job_id).await?)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Splits a rejected write into a terminal job, a job that is already
    /// past `target`, or a genuine error.
    fn classify_rejection(&self, err: ProgressError, target: Stage) -> Result<Rejection, PipelineError> {
        let stage = match &err {
            ProgressError::IllegalTransition { from, .. } => *from,
            ProgressError::StepNotOpen { stage, .. } => *stage,
            _ => return Err(err.into()),
        };

        if stage.is_terminal() {
            Ok(Rejection::Halted(stage))
        } else if stage.rank() >= target.rank() {
            Ok(Rejection::Ahead(stage))
        } else {
            Err(err.into())
        }
    }

    async fn note_benign_race(
        &self,
        job_id: Uuid,
        step: PipelineStep,
        target: Stage,
        stage: Stage,
        origin: InitOrigin,
    ) {
        tracing::warn!(
            job_id = %job_id,
            step = %step,
            target = %target,
            stage = %stage,
            origin = %origin,
            "Transition rejected, another writer got there first"
        );
        self.metrics
            .record_transition(target.as_str(), TransitionOutcome::BenignRace);
        self.stats.write().await.benign_races += 1;
    }

    async fn write_trace(&self, trace: GenerationTrace) {
        if let Err(e) = self.store.record_trace(&trace).await {
            tracing::warn!(
                job_id = %trace.job_id,
                step = %trace.step,
                error = %e,
                "Failed to record generation trace"
            );
        }
    }
}
