//! Work queues consumed by the worker pool.
//!
//! [`WorkQueue`] is the narrow interface the orchestrator and workers use.
//! [`RedisWorkQueue`] is the distributed implementation and supports:
//!
//! - Atomic dequeue using BRPOPLPUSH
//! - Requeue for retries and a dead letter list for exhausted items
//! - Recovery of items left in the processing list by crashed workers
//!
//! # Queue Structure
//!
//! The Redis queue uses three lists and a result key space:
//!
//! - `{queue_name}`: Main queue where items are enqueued
//! - `{queue_name}:processing`: Items being processed (for crash recovery)
//! - `{queue_name}:dead_letter`: Items that failed after max attempts
//! - `{queue_name}:results:{item_id}`: Work results, kept for 7 days

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::job::{DeadLetterEntry, WorkItem, WorkResult};
use super::memory_queue::InMemoryWorkQueue;

/// How long work results are kept in Redis.
const RESULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize item data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Statistics about queue state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub queue_name: String,
    /// Items waiting to be processed.
    pub pending: usize,
    /// Items currently being processed.
    pub processing: usize,
    /// Items in the dead letter list.
    pub dead_letter: usize,
}

impl QueueStats {
    /// Returns the total number of items in all lists.
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.dead_letter
    }
}

/// A reliable FIFO of work items.
///
/// A dequeued item stays in a processing set until it is completed,
/// requeued or dead-lettered.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError>;

    /// Waits up to `timeout` for the next item.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, QueueError>;

    /// Removes a finished item from processing and stores its result.
    async fn complete(&self, result: WorkResult) -> Result<(), QueueError>;

    /// Returns an item to the front of the queue for retry.
    async fn requeue(&self, item: WorkItem) -> Result<(), QueueError>;

    async fn dead_letter(&self, item: WorkItem, error: &str) -> Result<(), QueueError>;

    /// Number of items waiting in the main queue.
    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    async fn get_result(&self, item_id: Uuid) -> Result<Option<WorkResult>, QueueError>;

    /// Dead letter entries, newest first.
    async fn peek_dead_letter(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError>;

    /// Moves items abandoned in the processing set back to the queue.
    /// Returns the number of items requeued.
    async fn recover_processing(&self) -> Result<usize, QueueError> {
        Ok(0)
    }
}

/// Opens the Redis queue when a URL is given, the in-process queue otherwise.
pub async fn open_queue(
    redis_url: Option<&str>,
    queue_name: &str,
) -> Result<Arc<dyn WorkQueue>, QueueError> {
    match redis_url {
        Some(url) => {
            let queue = RedisWorkQueue::connect(url, queue_name).await?;
            tracing::info!(queue = %queue_name, "Using Redis work queue");
            Ok(Arc::new(queue))
        }
        None => {
            tracing::info!(queue = %queue_name, "Using in-memory work queue");
            Ok(Arc::new(InMemoryWorkQueue::new(queue_name)))
        }
    }
}

/// Redis-based work queue with reliable dequeue.
///
/// The queue uses BRPOPLPUSH for atomic dequeue operations, ensuring that
/// items are not lost if a worker crashes during processing.
pub struct RedisWorkQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    queue_name: String,
    processing_queue: String,
    dead_letter_queue: String,
    results_key: String,
}

impl RedisWorkQueue {
    /// Connects to Redis and creates a new work queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a queue from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        let keys = QueueKeys::new(queue_name);
        Self {
            redis,
            queue_name: keys.queue,
            processing_queue: keys.processing,
            dead_letter_queue: keys.dead_letter,
            results_key: keys.results,
        }
    }

    /// Enqueues several items in one round trip.
    pub async fn enqueue_batch(&self, items: Vec<WorkItem>) -> Result<(), QueueError> {
        if items.is_empty() {
            return Ok(());
        }

        let serialized: Result<Vec<String>, _> = items.iter().map(serde_json::to_string).collect();
        let serialized = serialized?;

        let mut conn = self.redis.clone();
        let mut pipe = redis::pipe();
        for data in &serialized {
            pipe.lpush(&self.queue_name, data);
        }
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_queue).await?;
        Ok(len)
    }

    pub async fn dead_letter_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.dead_letter_queue).await?;
        Ok(len)
    }

    /// Deletes the main, processing and dead letter lists.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(&self.queue_name)
            .del(&self.processing_queue)
            .del(&self.dead_letter_queue);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Removes an item from the processing list by id.
    ///
    /// The stored copy may differ from the caller's (the attempt counter
    /// moves), so entries are matched on the item id.
    async fn remove_from_processing(&self, item_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for data in entries {
            if let Ok(item) = serde_json::from_str::<WorkItem>(&data) {
                if item.id == item_id {
                    conn.lrem::<_, _, ()>(&self.processing_queue, 1, &data)
                        .await?;
                    return Ok(());
                }
            }
        }

        // Already removed, e.g. by recovery on another worker.
        Ok(())
    }
}

#[async_trait]
impl WorkQueue for RedisWorkQueue {
    fn name(&self) -> &str {
        &self.queue_name
    }

    /// Items are pushed on the left and popped from the right (FIFO).
    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(&item)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        // BRPOPLPUSH atomically pops from source and pushes to destination
        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, result: WorkResult) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let result_key = format!("{}:{}", self.results_key, result.item_id);
        let data = serde_json::to_string(&result)?;
        conn.set_ex::<_, _, ()>(&result_key, &data, RESULT_TTL_SECS)
            .await?;

        self.remove_from_processing(result.item_id).await
    }

    async fn requeue(&self, item: WorkItem) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        self.remove_from_processing(item.id).await?;

        // Right side is the next to be popped.
        let serialized = serde_json::to_string(&item)?;
        conn.rpush::<_, _, ()>(&self.queue_name, serialized).await?;

        Ok(())
    }

    async fn dead_letter(&self, item: WorkItem, error: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        self.remove_from_processing(item.id).await?;

        let entry = DeadLetterEntry::new(item, error);
        let serialized = serde_json::to_string(&entry)?;
        conn.lpush::<_, _, ()>(&self.dead_letter_queue, serialized)
            .await?;

        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (pending, processing, dead_letter) =
            tokio::try_join!(self.len(), self.processing_len(), self.dead_letter_len())?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending,
            processing,
            dead_letter,
        })
    }

    async fn get_result(&self, item_id: Uuid) -> Result<Option<WorkResult>, QueueError> {
        let mut conn = self.redis.clone();
        let result_key = format!("{}:{}", self.results_key, item_id);

        let data: Option<String> = conn.get(&result_key).await?;
        match data {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn peek_dead_letter(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(&self.dead_letter_queue, 0, limit as isize - 1)
            .await?;

        let entries: Result<Vec<DeadLetterEntry>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();
        Ok(entries?)
    }

    /// Should be called on worker startup. Every entry counts as an attempt;
    /// entries out of attempts are dead-lettered instead.
    async fn recover_processing(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let entries: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for data in entries {
            let Ok(mut item) = serde_json::from_str::<WorkItem>(&data) else {
                tracing::warn!(queue = %self.queue_name, "Dropping unreadable processing entry");
                conn.lrem::<_, _, ()>(&self.processing_queue, 1, &data)
                    .await?;
                continue;
            };

            item.increment_attempts();
            if item.should_retry() {
                let serialized = serde_json::to_string(&item)?;

                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(&self.processing_queue, 1, &data)
                    .rpush(&self.queue_name, &serialized);
                pipe.query_async::<_, ()>(&mut conn).await?;

                recovered += 1;
            } else {
                self.dead_letter(item, "recovered from processing list after max attempts")
                    .await?;
            }
        }

        Ok(recovered)
    }
}

/// Redis key names derived from a queue name.
struct QueueKeys {
    queue: String,
    processing: String,
    dead_letter: String,
    results: String,
}

impl QueueKeys {
    fn new(queue_name: &str) -> Self {
        Self {
            queue: queue_name.to_string(),
            processing: format!("{}:processing", queue_name),
            dead_letter: format!("{}:dead_letter", queue_name),
            results: format!("{}:results", queue_name),
        }
    }
}
