use std::collections::HashSet;
use std::sync::Arc;

use auklet_domain::{InjuredSegment, Position, StreamId};

use crate::error::QueueError;
use crate::queue::RepairQueue;

/// Invoked once when the segment it was registered with turns out to be a
/// fresh queue entry (not an update).
pub type NewItemCallback = Box<dyn FnOnce() + Send>;

/// Batching wrapper around [`RepairQueue::insert_batch`].
///
/// Not thread-safe: owned by a single producer (the change-stream observer).
/// Accumulates up to `batch_size` segments and issues one batched insert,
/// then fires the new-insert callback for exactly the segments that were
/// freshly created. Callers must [`flush`](InsertBuffer::flush) before
/// dropping the buffer or residual segments are lost.
pub struct InsertBuffer {
    queue: Arc<dyn RepairQueue>,
    batch_size: usize,
    pending: Vec<(InjuredSegment, Option<NewItemCallback>)>,
}

impl InsertBuffer {
    pub fn new(queue: Arc<dyn RepairQueue>, batch_size: usize) -> Self {
        InsertBuffer {
            queue,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
        }
    }

    pub async fn insert(
        &mut self,
        segment: InjuredSegment,
        on_new: Option<NewItemCallback>,
    ) -> Result<(), QueueError> {
        self.pending.push((segment, on_new));
        if self.pending.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Force a batch of any residual segments.
    pub async fn flush(&mut self) -> Result<(), QueueError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let drained: Vec<(InjuredSegment, Option<NewItemCallback>)> =
            self.pending.drain(..).collect();
        let segments: Vec<InjuredSegment> = drained.iter().map(|(s, _)| s.clone()).collect();
        let fresh = self.queue.insert_batch(&segments).await?;
        let fresh_keys: HashSet<(StreamId, Position)> = fresh.iter().map(|s| s.key()).collect();
        for (segment, callback) in drained {
            if let Some(callback) = callback {
                if fresh_keys.contains(&segment.key()) {
                    callback();
                }
            }
        }
        Ok(())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryQueue;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn injured(index: u32) -> InjuredSegment {
        InjuredSegment {
            stream_id: StreamId::random(),
            position: Position::new(0, index),
            segment_health: 1.0,
            placement: 0,
            attempted_at: None,
            updated_at: Utc::now(),
            inserted_at: Utc::now(),
            num_normalized_healthy: 0,
            num_normalized_retrievable: 0,
            num_out_of_placement: 0,
        }
    }

    fn counter_callback(counter: &Arc<AtomicUsize>) -> Option<NewItemCallback> {
        let counter = counter.clone();
        Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test]
    async fn batches_at_threshold() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let mut buffer = InsertBuffer::new(queue.clone(), 3);

        buffer.insert(injured(1), None).await.unwrap();
        buffer.insert(injured(2), None).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 0, "below threshold, unflushed");
        assert_eq!(buffer.pending_len(), 2);

        buffer.insert(injured(3), None).await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 3, "threshold reached");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test]
    async fn flush_drains_residue() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let mut buffer = InsertBuffer::new(queue.clone(), 10);

        buffer.insert(injured(1), None).await.unwrap();
        buffer.flush().await.unwrap();
        assert_eq!(queue.count().await.unwrap(), 1);

        // flushing an empty buffer is a no-op
        buffer.flush().await.unwrap();
    }

    #[tokio::test]
    async fn callbacks_fire_only_for_new_entries() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let existing = injured(1);
        queue.insert(&existing).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let mut buffer = InsertBuffer::new(queue.clone(), 10);
        buffer
            .insert(existing.clone(), counter_callback(&calls))
            .await
            .unwrap();
        buffer
            .insert(injured(2), counter_callback(&calls))
            .await
            .unwrap();
        buffer.flush().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1, "only the fresh entry fires");
    }

    #[tokio::test]
    async fn callbacks_fire_at_most_once() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut buffer = InsertBuffer::new(queue.clone(), 1);

        buffer.insert(injured(1), counter_callback(&calls)).await.unwrap();
        buffer.flush().await.unwrap();
        buffer.flush().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
