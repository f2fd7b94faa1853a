//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by course_forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all course_forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Attempted stage transitions, labeled by target stage and outcome
/// (`accepted`, `rejected`, `benign_race`).
pub static STAGE_TRANSITIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Wall-clock duration of one `run_stage` invocation, labeled by step and outcome.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Regeneration engine results, labeled by winning strategy and outcome.
pub static REGENERATION_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Individual repair strategy attempts, labeled by strategy and outcome.
pub static REPAIR_ATTEMPTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total generator requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Generator request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Number of work items in queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of work items currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Number of active workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Safe to call more than once: later calls build a fresh registry but the
/// statics keep the first set of instances.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let stage_transitions_total = CounterVec::new(
        Opts::new(
            "course_forge_stage_transitions_total",
            "Attempted stage transitions",
        ),
        &["to_stage", "outcome"],
    )?;

    let stage_duration = HistogramVec::new(
        HistogramOpts::new(
            "course_forge_stage_duration_seconds",
            "Duration of one stage invocation in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
        &["step", "outcome"],
    )?;

    let regeneration_total = CounterVec::new(
        Opts::new(
            "course_forge_regeneration_total",
            "Regeneration engine results",
        ),
        &["strategy", "outcome"],
    )?;

    let repair_attempts_total = CounterVec::new(
        Opts::new(
            "course_forge_repair_attempts_total",
            "Repair strategy attempts",
        ),
        &["strategy", "outcome"],
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("course_forge_llm_requests_total", "Total generator requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "course_forge_llm_latency_seconds",
            "Generator request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("course_forge_queue_depth", "Number of work items in queue"),
        &["queue_name"],
    )?;

    let jobs_in_progress = Gauge::new(
        "course_forge_jobs_in_progress",
        "Number of work items currently being processed",
    )?;

    let active_workers = Gauge::new("course_forge_active_workers", "Number of active workers")?;

    registry.register(Box::new(stage_transitions_total.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(regeneration_total.clone()))?;
    registry.register(Box::new(repair_attempts_total.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // A concurrent initializer may have won; its instances stay authoritative.
    let _ = REGISTRY.set(registry);
    let _ = STAGE_TRANSITIONS_TOTAL.set(stage_transitions_total);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = REGENERATION_TOTAL.set(regeneration_total);
    let _ = REPAIR_ATTEMPTS_TOTAL.set(repair_attempts_total);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, the returned
/// string is a Prometheus comment describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
