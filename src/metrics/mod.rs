//! Prometheus metrics for course-forge.
//!
//! # Example
//!
//! ```ignore
//! use course_forge::metrics::{init_metrics, export_metrics, MetricsCollector, TransitionOutcome};
//!
//! init_metrics()?;
//! let collector = MetricsCollector::new();
//! collector.record_transition("stage_2_init", TransitionOutcome::Accepted);
//! collector.record_regeneration("critique-and-revise", "success");
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, TransitionOutcome};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, JOBS_IN_PROGRESS, LLM_LATENCY, LLM_REQUESTS_TOTAL, QUEUE_DEPTH,
    REGENERATION_TOTAL, REGISTRY, REPAIR_ATTEMPTS_TOTAL, STAGE_DURATION, STAGE_TRANSITIONS_TOTAL,
};
