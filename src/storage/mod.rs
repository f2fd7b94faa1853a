//! Durable progress storage on SQLite.
//!
//! The storage system consists of:
//! - **ProgressStore**: jobs, their stage and per-step progress, the
//!   transition audit log and generation traces
//! - **Migrations**: named, idempotent schema migrations
//!
//! # Usage
//!
//! ```rust,ignore
//! use course_forge::pipeline::PipelineStep;
//! use course_forge::storage::{ProgressStore, TraceFilter, TraceStatus};
//!
//! let store = ProgressStore::connect("sqlite://course_forge.db").await?;
//! store.run_migrations().await?;
//!
//! let job = store.create_job().await?;
//! store
//!     .advance_stage(job.id, PipelineStep::Summarization, "pending", None, None)
//!     .await?;
//!
//! let exhausted = store
//!     .list_traces(&TraceFilter::new().with_status(TraceStatus::Exhausted).with_limit(20))
//!     .await?;
//! ```

pub mod migrations;
pub mod models;
pub mod progress;
pub mod schema;

pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
pub use models::{
    GenerationTrace, ItemCompletion, ItemRecord, JobProgress, JobSnapshot, StepRecord, TraceFilter,
    TraceStatus, TransitionRecord,
};
pub use progress::{ProgressError, ProgressStore};
