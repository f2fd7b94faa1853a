//! Worker pool for processing stage work items from a queue.
//!
//! This module provides a pool of workers that process items from a shared
//! [`WorkQueue`]. Each worker runs as an independent async task, pulls items
//! from the queue and hands them to the pipeline orchestrator.
//!
//! # Features
//!
//! - Configurable number of workers
//! - Graceful shutdown with broadcast channel
//! - Per-item timeout
//! - Automatic retry of retryable failures
//! - Dead lettering and stage failure once attempts run out
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::metrics::MetricsCollector;
use crate::pipeline::{PipelineConfig, PipelineOrchestrator, StageOutcome};

use super::job::{WorkItem, WorkResult};
use super::queue::{QueueError, WorkQueue};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// Pipeline error during item processing.
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// A single item exceeded the per-item timeout.
    #[error("Work item timed out after {0:?}")]
    Timeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
    /// How long a dequeue waits when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum time allowed for processing a single item.
    pub job_timeout: Duration,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            poll_interval: Duration::from_secs(1),
            job_timeout: Duration::from_secs(900),
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Takes worker count, poll interval and item timeout from the pipeline
    /// configuration.
    pub fn from_pipeline_config(config: &PipelineConfig) -> Self {
        Self::new(config.num_workers)
            .with_poll_interval(config.poll_interval)
            .with_job_timeout(config.job_timeout)
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the per-item timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing items.
    pub active_workers: usize,
    /// Items whose stage completed (or had already been completed).
    pub items_completed: u64,
    /// Items whose stage failed, including dead-lettered items.
    pub items_failed: u64,
    /// Items that found their job terminal.
    pub items_halted: u64,
    /// Failed attempts that were put back on the queue.
    pub items_retried: u64,
    pub items_dead_lettered: u64,
    /// Average item processing duration.
    pub average_item_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of items that reached a final status.
    pub fn total_processed(&self) -> u64 {
        self.items_completed + self.items_failed + self.items_halted
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.items_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    items_completed: AtomicU64,
    items_failed: AtomicU64,
    items_halted: AtomicU64,
    items_retried: AtomicU64,
    items_dead_lettered: AtomicU64,
    total_duration_ms: AtomicU64,
    timed_items: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            items_completed: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            items_halted: AtomicU64::new(0),
            items_retried: AtomicU64::new(0),
            items_dead_lettered: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            timed_items: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_duration(&self, duration: Duration) {
        self.timed_items.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_completion(&self, duration: Duration) {
        self.items_completed.fetch_add(1, Ordering::SeqCst);
        self.record_duration(duration);
    }

    fn record_failure(&self, duration: Duration) {
        self.items_failed.fetch_add(1, Ordering::SeqCst);
        self.record_duration(duration);
    }

    fn record_halted(&self, duration: Duration) {
        self.items_halted.fetch_add(1, Ordering::SeqCst);
        self.record_duration(duration);
    }

    fn record_retry(&self) {
        self.items_retried.fetch_add(1, Ordering::SeqCst);
    }

    fn record_dead_letter(&self, duration: Duration) {
        self.items_dead_lettered.fetch_add(1, Ordering::SeqCst);
        self.record_failure(duration);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let timed = self.timed_items.load(Ordering::SeqCst);

        let average_duration = if timed > 0 {
            Duration::from_millis(total_duration_ms / timed)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: self.active_workers.load(Ordering::SeqCst) as usize,
            items_completed: self.items_completed.load(Ordering::SeqCst),
            items_failed: self.items_failed.load(Ordering::SeqCst),
            items_halted: self.items_halted.load(Ordering::SeqCst),
            items_retried: self.items_retried.load(Ordering::SeqCst),
            items_dead_lettered: self.items_dead_lettered.load(Ordering::SeqCst),
            average_item_duration: average_duration,
        }
    }
}

/// Worker pool that manages multiple workers processing items from a queue.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queue: Arc<dyn WorkQueue>,
    orchestrator: Arc<PipelineOrchestrator>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        queue: Arc<dyn WorkQueue>,
        orchestrator: Arc<PipelineOrchestrator>,
    ) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queue,
            orchestrator,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            metrics: MetricsCollector::new(),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        // Recover any items stuck in the processing list from previous runs
        match self.queue.recover_processing().await {
            Ok(recovered) => {
                if recovered > 0 {
                    info!(recovered = recovered, "Recovered items from processing list");
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to recover processing items");
            }
        }

        for i in 0..self.config.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                orchestrator: Arc::clone(&self.orchestrator),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.config.poll_interval,
                job_timeout: self.config.job_timeout,
                stats: Arc::clone(&self.stats),
                metrics: self.metrics.clone(),
            };

            self.worker_handles.push(tokio::spawn(worker.run()));
        }

        self.is_running.store(true, Ordering::SeqCst);
        self.metrics.update_workers(self.config.num_workers);
        info!(
            num_workers = self.config.num_workers,
            queue = %self.queue.name(),
            "Worker pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish their current item before stopping.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.worker_handles.drain(..).collect();
        let shutdown_future = async {
            for result in futures::future::join_all(handles).await {
                if let Err(e) = result {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        self.metrics.update_workers(0);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }

    /// Scales the pool to a new number of workers.
    ///
    /// Running pools are stopped and restarted with the new count.
    pub async fn scale(&mut self, num_workers: usize) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            self.config.num_workers = num_workers;
            return Ok(());
        }

        if num_workers == self.config.num_workers {
            return Ok(());
        }

        info!(
            current = self.config.num_workers,
            target = num_workers,
            "Scaling worker pool"
        );

        self.shutdown().await?;
        self.config.num_workers = num_workers;
        self.start().await
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }
}

/// A single worker that processes items from the queue.
pub struct Worker {
    id: String,
    queue: Arc<dyn WorkQueue>,
    orchestrator: Arc<PipelineOrchestrator>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    /// Polls for items and processes them until a shutdown signal arrives.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.dequeue(self.poll_interval).await {
                Ok(Some(item)) => {
                    self.process_item(item).await;
                    if let Ok(depth) = self.queue.len().await {
                        self.metrics.update_queue_depth(self.queue.name(), depth);
                    }
                }
                Ok(None) => {
                    debug!(worker_id = %self.id, "No work items available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue work item");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    async fn process_item(&self, mut item: WorkItem) {
        let start_time = Instant::now();
        item.increment_attempts();

        info!(
            worker_id = %self.id,
            item_id = %item.id,
            job_id = %item.job_id,
            step = %item.step,
            attempt = item.attempts,
            "Processing work item"
        );

        self.stats.increment_active();
        self.metrics.inc_jobs_in_progress();

        let result = self.execute_with_timeout(&item).await;
        let duration = start_time.elapsed();

        self.metrics.dec_jobs_in_progress();
        self.stats.decrement_active();

        match result {
            Ok(outcome) => self.finish(&item, outcome, duration).await,
            Err((e, retryable)) => self.handle_error(item, e, retryable, duration).await,
        }
    }

    async fn execute_with_timeout(
        &self,
        item: &WorkItem,
    ) -> Result<StageOutcome, (PoolError, bool)> {
        match tokio::time::timeout(self.job_timeout, self.orchestrator.run_stage(item)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                let retryable = e.is_retryable();
                Err((PoolError::Pipeline(e.to_string()), retryable))
            }
            Err(_) => Err((PoolError::Timeout(self.job_timeout), true)),
        }
    }

    async fn finish(&self, item: &WorkItem, outcome: StageOutcome, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;

        let result = match &outcome {
            StageOutcome::Completed { strategy_used, .. } => {
                self.stats.record_completion(duration);
                WorkResult::success(item, &self.id, strategy_used.as_str(), duration_ms)
            }
            StageOutcome::Skipped { .. } => {
                self.stats.record_completion(duration);
                WorkResult::skipped(item, &self.id, duration_ms)
            }
            StageOutcome::Failed { error, .. } => {
                self.stats.record_failure(duration);
                WorkResult::failure(item, &self.id, error.as_str(), duration_ms)
            }
            StageOutcome::Halted { .. } => {
                self.stats.record_halted(duration);
                WorkResult::halted(item, &self.id, duration_ms)
            }
        };

        info!(
            worker_id = %self.id,
            item_id = %item.id,
            job_id = %item.job_id,
            status = %result.status,
            duration_ms = duration_ms,
            "Work item finished"
        );

        if let Err(e) = self.queue.complete(result).await {
            error!(
                worker_id = %self.id,
                item_id = %item.id,
                error = %e,
                "Failed to mark work item complete"
            );
        }
    }

    async fn handle_error(&self, item: WorkItem, e: PoolError, retryable: bool, duration: Duration) {
        let item_id = item.id;

        if retryable && item.should_retry() {
            self.stats.record_retry();
            warn!(
                worker_id = %self.id,
                item_id = %item_id,
                job_id = %item.job_id,
                error = %e,
                remaining_attempts = item.remaining_attempts(),
                "Work item failed, requeueing for retry"
            );

            if let Err(requeue_err) = self.queue.requeue(item).await {
                error!(
                    worker_id = %self.id,
                    item_id = %item_id,
                    error = %requeue_err,
                    "Failed to requeue work item"
                );
            }
            return;
        }

        self.stats.record_dead_letter(duration);
        error!(
            worker_id = %self.id,
            item_id = %item_id,
            job_id = %item.job_id,
            error = %e,
            "Work item failed, moving to dead letter list"
        );

        let (job_id, step) = (item.job_id, item.step);
        let message = e.to_string();

        if let Err(dlq_err) = self.queue.dead_letter(item, &message).await {
            error!(
                worker_id = %self.id,
                item_id = %item_id,
                error = %dlq_err,
                "Failed to move work item to dead letter list"
            );
        }

        if let Err(fail_err) = self.orchestrator.fail_stage(job_id, step, &message).await {
            error!(
                worker_id = %self.id,
                job_id = %job_id,
                error = %fail_err,
                "Failed to mark stage failed"
            );
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}
