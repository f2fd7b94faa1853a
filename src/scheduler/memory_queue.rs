//! In-process work queue used when no Redis URL is configured.
//!
//! Same semantics as the Redis queue: a FIFO main queue, a processing set
//! for dequeued items, and a dead letter list. Nothing survives a restart.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use super::job::{DeadLetterEntry, WorkItem, WorkResult};
use super::queue::{QueueError, QueueStats, WorkQueue};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<WorkItem>,
    processing: HashMap<Uuid, WorkItem>,
    /// Newest last.
    dead_letter: Vec<DeadLetterEntry>,
    results: HashMap<Uuid, WorkResult>,
}

/// A [`WorkQueue`] backed by process memory.
pub struct InMemoryWorkQueue {
    name: String,
    state: Mutex<QueueState>,
    available: Notify,
}

impl InMemoryWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    pub async fn processing_len(&self) -> usize {
        self.state.lock().await.processing.len()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, item: WorkItem) -> Result<(), QueueError> {
        self.state.lock().await.pending.push_back(item);
        self.available.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<WorkItem>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so an enqueue between the
            // check and the wait is not missed.
            let notified = self.available.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.pending.pop_front() {
                    state.processing.insert(item.id, item.clone());
                    return Ok(Some(item));
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, result: WorkResult) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.processing.remove(&result.item_id);
        state.results.insert(result.item_id, result);
        Ok(())
    }

    async fn requeue(&self, item: WorkItem) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock().await;
            state.processing.remove(&item.id);
            state.pending.push_front(item);
        }
        self.available.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, item: WorkItem, error: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.processing.remove(&item.id);
        state.dead_letter.push(DeadLetterEntry::new(item, error));
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.state.lock().await;
        Ok(QueueStats {
            queue_name: self.name.clone(),
            pending: state.pending.len(),
            processing: state.processing.len(),
            dead_letter: state.dead_letter.len(),
        })
    }

    async fn get_result(&self, item_id: Uuid) -> Result<Option<WorkResult>, QueueError> {
        Ok(self.state.lock().await.results.get(&item_id).cloned())
    }

    async fn peek_dead_letter(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.dead_letter.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stage::PipelineStep;
    use serde_json::json;
    use std::sync::Arc;

    fn item() -> WorkItem {
        WorkItem::new(Uuid::new_v4(), PipelineStep::Summarization, json!({}))
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryWorkQueue::new("test");
        let first = item();
        let second = item();
        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue(timeout).await.unwrap().unwrap().id, first.id);
        assert_eq!(queue.dequeue(timeout).await.unwrap().unwrap().id, second.id);
        assert_eq!(queue.processing_len().await, 2);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = InMemoryWorkQueue::new("test");
        let result = queue.dequeue(Duration::from_millis(20)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryWorkQueue::new("test"));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let sent = item();
        queue.enqueue(sent.clone()).await.unwrap();

        let received = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(received.id, sent.id);
    }

    #[tokio::test]
    async fn test_complete_stores_result() {
        let queue = InMemoryWorkQueue::new("test");
        queue.enqueue(item()).await.unwrap();
        let taken = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        queue
            .complete(WorkResult::success(&taken, "worker-0", "none", 3))
            .await
            .unwrap();

        assert_eq!(queue.processing_len().await, 0);
        let stored = queue.get_result(taken.id).await.unwrap().unwrap();
        assert!(stored.is_success());
    }

    #[tokio::test]
    async fn test_requeue_goes_to_front() {
        let queue = InMemoryWorkQueue::new("test");
        queue.enqueue(item()).await.unwrap();
        queue.enqueue(item()).await.unwrap();

        let mut retried = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        retried.increment_attempts();
        queue.requeue(retried.clone()).await.unwrap();

        let next = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(next.id, retried.id);
        assert_eq!(next.attempts, 1);
    }

    #[tokio::test]
    async fn test_dead_letter_and_stats() {
        let queue = InMemoryWorkQueue::new("test");
        queue.enqueue(item()).await.unwrap();
        queue.enqueue(item()).await.unwrap();
        let taken = queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();

        queue.dead_letter(taken.clone(), "out of attempts").await.unwrap();

        let stats = queue.stats().await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 0);
        assert_eq!(stats.dead_letter, 1);

        let entries = queue.peek_dead_letter(10).await.unwrap();
        assert_eq!(entries[0].item.id, taken.id);
        assert_eq!(entries[0].error, "out of attempts");
    }
}
