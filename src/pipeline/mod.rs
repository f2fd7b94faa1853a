//! Course generation pipeline: stages, transitions and orchestration.
//!
//! A job moves through four work steps and a finalization step. Every step
//! goes `_init -> _running -> _complete`, and every write is checked against
//! a static transition table inside the progress store.
//!
//! # Architecture
//!
//! - **Stage**: the 17 persisted stages and the 5 pipeline steps
//! - **Transitions**: the static table of legal stage moves
//! - **Handler**: one collaborator per step producing a raw artifact
//! - **Artifacts**: schemas of the course artifacts the stages gate on
//! - **Orchestrator**: idempotent initialization, quality gating, progress writes
//! - **Config**: configuration for all pipeline components
//!
//! # Stage Flow
//!
//! 1. **Initialization**: `enqueue_stage` moves the job to `stage_n_init` and
//!    enqueues a work item. Workers repeat the same idempotent step before
//!    running, so a missed or raced initialization is harmless.
//! 2. **Running**: the worker marks `stage_n_running` and calls the handler.
//! 3. **Quality gate**: the raw output runs through the regeneration engine
//!    with the handler's schema.
//! 4. **Completion**: accepted artifacts complete the step; after step 4 the
//!    job is finalized. Exhausted regeneration fails the job.
//!
//! # Example
//!
//! ```rust,ignore
//! use course_forge::pipeline::{PipelineConfig, PipelineOrchestrator, PipelineStep};
//! use course_forge::storage::ProgressStore;
//!
//! let config = PipelineConfig::from_env()?;
//! let store = ProgressStore::connect(&config.database_url).await?;
//! let orchestrator = PipelineOrchestrator::from_config(&config, store, generator)?
//!     .with_queue(queue);
//!
//! let job = orchestrator.store().create_job().await?;
//! orchestrator
//!     .enqueue_stage(job.id, PipelineStep::Summarization, payload)
//!     .await?;
//! ```

pub mod artifacts;
pub mod config;
pub mod handler;
pub mod orchestrator;
pub mod stage;
pub mod transitions;

// Re-export main types for convenience
pub use artifacts::{default_handlers, ArtifactKind};
pub use config::{ConfigError, PipelineConfig};
pub use handler::{GeneratorStageHandler, RawArtifact, StageHandler};
pub use orchestrator::{
    InitOrigin, InitOutcome, OrchestratorStats, PipelineError, PipelineOrchestrator, StageOutcome,
    GENERATION_FAILED_MESSAGE,
};
pub use stage::{target_stage, PipelineStep, Stage, StepStatus};
pub use transitions::{allowed_next, is_legal_transition};
