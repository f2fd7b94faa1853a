//! Work distribution with worker pools and Redis queues.
//!
//! This module provides infrastructure for running pipeline stages across
//! many workers and processes:
//!
//! - **WorkQueue**: queue interface with Redis (BRPOPLPUSH) and in-memory implementations
//! - **WorkerPool**: pool of workers that run stages concurrently
//! - **WorkItem**: one stage run request with retry and dead letter support
//!
//! # Architecture
//!
//! ```text
//!                      ┌────────────────┐
//!                      │  enqueue_stage │
//!                      │   (API/CLI)    │
//!                      └───────┬────────┘
//!                              │
//!                      ┌───────▼────────┐
//!                      │   Work Queue   │
//!                      │ (Redis/memory) │
//!                      └───────┬────────┘
//!                              │
//!         ┌────────────────────┼────────────────────┐
//!         │                    │                    │
//!         ▼                    ▼                    ▼
//!    ┌─────────┐          ┌─────────┐          ┌─────────┐
//!    │ Worker 1│          │ Worker 2│          │ Worker N│
//!    └────┬────┘          └────┬────┘          └────┬────┘
//!         └────────────────────┼────────────────────┘
//!                              ▼
//!                      ┌────────────────┐
//!                      │ Progress Store │
//!                      └────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use course_forge::scheduler::{open_queue, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let queue = open_queue(config.redis_url.as_deref(), &config.queue_name).await?;
//! let orchestrator = Arc::new(
//!     PipelineOrchestrator::from_config(&config, store, generator)?.with_queue(Arc::clone(&queue)),
//! );
//!
//! let mut pool = WorkerPool::new(WorkerPoolConfig::from_pipeline_config(&config), queue, orchestrator);
//! pool.start().await?;
//!
//! // Graceful shutdown
//! pool.shutdown().await?;
//! ```
//!
//! # Reliability Features
//!
//! - **Atomic dequeue**: BRPOPLPUSH moves items to a processing list
//! - **Crash recovery**: items left in the processing list are requeued on pool start
//! - **Dead letter list**: items out of attempts are kept for analysis and their stage is failed
//! - **Graceful shutdown**: workers finish their current item before stopping
//! - **Duplicate delivery**: the progress store rejects conflicting writes, so an
//!   item processed twice completes its stage once

pub mod job;
pub mod memory_queue;
pub mod queue;
pub mod worker_pool;

// Re-export main types for convenience
pub use job::{DeadLetterEntry, WorkItem, WorkResult, WorkStatus};
pub use memory_queue::InMemoryWorkQueue;
pub use queue::{open_queue, QueueError, QueueStats, RedisWorkQueue, WorkQueue};
pub use worker_pool::{PoolError, PoolStats, Worker, WorkerPool, WorkerPoolConfig};
