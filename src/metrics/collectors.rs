//! High-level metric recording for course-forge operations.
//!
//! `MetricsCollector` wraps the raw Prometheus statics so call sites never
//! deal with label ordering or uninitialized registries. Every method is a
//! no-op until `init_metrics()` has run.

use super::prometheus::{
    ACTIVE_WORKERS, JOBS_IN_PROGRESS, LLM_LATENCY, LLM_REQUESTS_TOTAL, QUEUE_DEPTH,
    REGENERATION_TOTAL, REPAIR_ATTEMPTS_TOTAL, STAGE_DURATION, STAGE_TRANSITIONS_TOTAL,
};

/// Outcome label for an attempted stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Accepted,
    Rejected,
    BenignRace,
}

impl TransitionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Accepted => "accepted",
            TransitionOutcome::Rejected => "rejected",
            TransitionOutcome::BenignRace => "benign_race",
        }
    }
}

/// Metrics collector for recording course-forge operational metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record an attempted transition into `to_stage`.
    pub fn record_transition(&self, to_stage: &str, outcome: TransitionOutcome) {
        if let Some(transitions) = STAGE_TRANSITIONS_TOTAL.get() {
            transitions
                .with_label_values(&[to_stage, outcome.as_str()])
                .inc();
        }

        tracing::trace!(
            to_stage = to_stage,
            outcome = outcome.as_str(),
            "Recorded transition metric"
        );
    }

    /// Record one finished `run_stage` invocation.
    pub fn record_stage(&self, step: &str, outcome: &str, duration_secs: f64) {
        if let Some(duration) = STAGE_DURATION.get() {
            duration
                .with_label_values(&[step, outcome])
                .observe(duration_secs);
        }
    }

    /// Record the final result of a regeneration run.
    ///
    /// `strategy` is the winning strategy name, `"none"` when the initial
    /// output was already valid, or `"exhausted"` on failure.
    pub fn record_regeneration(&self, strategy: &str, outcome: &str) {
        if let Some(regenerations) = REGENERATION_TOTAL.get() {
            regenerations.with_label_values(&[strategy, outcome]).inc();
        }
    }

    /// Record a single repair strategy attempt (`accepted`, `rejected`, `skipped`).
    pub fn record_repair_attempt(&self, strategy: &str, outcome: &str) {
        if let Some(attempts) = REPAIR_ATTEMPTS_TOTAL.get() {
            attempts.with_label_values(&[strategy, outcome]).inc();
        }
    }

    /// Record a generator request.
    pub fn record_llm_request(&self, model: &str, success: bool, latency_secs: f64) {
        let status = if success { "success" } else { "failure" };

        if let Some(requests) = LLM_REQUESTS_TOTAL.get() {
            requests.with_label_values(&[model, status]).inc();
        }

        if let Some(latency) = LLM_LATENCY.get() {
            latency.with_label_values(&[model]).observe(latency_secs);
        }

        tracing::trace!(
            model = model,
            success = success,
            latency_secs = latency_secs,
            "Recorded LLM request metric"
        );
    }

    pub fn update_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }
    }

    pub fn update_workers(&self, count: usize) {
        if let Some(workers) = ACTIVE_WORKERS.get() {
            workers.set(count as f64);
        }
    }

    pub fn inc_jobs_in_progress(&self) {
        if let Some(jobs) = JOBS_IN_PROGRESS.get() {
            jobs.inc();
        }
    }

    pub fn dec_jobs_in_progress(&self) {
        if let Some(jobs) = JOBS_IN_PROGRESS.get() {
            jobs.dec();
        }
    }
}
