use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::trace;

use auklet_changestream::{DataChangeRecord, RecordFn, RecordResult};
use auklet_domain::{segment_health, InjuredSegment, Position, StreamId};
use auklet_queue::{InsertBuffer, QueueError, RepairQueue};

use crate::metrics::ObserverMetrics;

const SEGMENTS_TABLE: &str = "segments";

/// Change-stream consumer that feeds the repair queue.
///
/// Watches segment-table mutations for rows whose healthy-piece count
/// dropped to or below the repair threshold and batches them into the queue
/// through an [`InsertBuffer`]. Owned by a single partition callback at a
/// time (the buffer is not thread-safe); wrap in a mutex via
/// [`SegmentHealthObserver::record_fn`] to plug into the partition
/// processor.
pub struct SegmentHealthObserver {
    buffer: InsertBuffer,
    metrics: ObserverMetrics,
}

/// The segment columns this subsystem reads out of a row mutation.
#[derive(Debug, Clone)]
struct SegmentUpdate {
    stream_id: StreamId,
    position: Position,
    healthy: i32,
    prev_healthy: Option<i32>,
    retrievable: i32,
    out_of_placement: i32,
    required: i32,
    repair: i32,
    optimal: i32,
    placement: u16,
}

fn get_i64(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

impl SegmentUpdate {
    fn from_mod(keys: &Value, new_values: &Value, old_values: &Value) -> Option<Self> {
        let stream_id: StreamId = keys.get("stream_id")?.as_str()?.parse().ok()?;
        let position = Position::decode(get_i64(keys, "position")? as u64);
        let healthy = get_i64(new_values, "pieces_healthy")? as i32;
        Some(SegmentUpdate {
            stream_id,
            position,
            healthy,
            prev_healthy: get_i64(old_values, "pieces_healthy").map(|v| v as i32),
            retrievable: get_i64(new_values, "pieces_retrievable").unwrap_or(healthy as i64) as i32,
            out_of_placement: get_i64(new_values, "pieces_out_of_placement").unwrap_or(0) as i32,
            required: get_i64(new_values, "required")? as i32,
            repair: get_i64(new_values, "repair_threshold")? as i32,
            optimal: get_i64(new_values, "optimal_threshold")? as i32,
            placement: get_i64(new_values, "placement").unwrap_or(0) as u16,
        })
    }

    /// Queue only on a decrease that lands at or below the repair threshold;
    /// unchanged or recovering rows are churn the queue already knows about.
    fn needs_repair(&self) -> bool {
        if self.healthy > self.repair {
            return false;
        }
        match self.prev_healthy {
            Some(prev) => self.healthy < prev,
            None => true,
        }
    }

    fn into_injured(self) -> InjuredSegment {
        let now = Utc::now();
        InjuredSegment {
            stream_id: self.stream_id,
            position: self.position,
            segment_health: segment_health(self.healthy, self.required, self.optimal),
            placement: self.placement,
            attempted_at: None,
            updated_at: now,
            inserted_at: now,
            num_normalized_healthy: self.healthy,
            num_normalized_retrievable: self.retrievable,
            num_out_of_placement: self.out_of_placement,
        }
    }
}

impl SegmentHealthObserver {
    pub fn new(
        queue: Arc<dyn RepairQueue>,
        batch_size: usize,
        metrics: ObserverMetrics,
    ) -> Self {
        SegmentHealthObserver {
            buffer: InsertBuffer::new(queue, batch_size),
            metrics,
        }
    }

    pub async fn process(&mut self, record: &DataChangeRecord) -> Result<(), QueueError> {
        self.metrics.records_processed.inc();
        if record.table != SEGMENTS_TABLE {
            return Ok(());
        }
        for row in &record.mods {
            let Some(update) =
                SegmentUpdate::from_mod(&row.keys, &row.new_values, &row.old_values)
            else {
                trace!(table = %record.table, "row mod without segment health columns");
                continue;
            };
            if !update.needs_repair() {
                continue;
            }
            let counter = self.metrics.segments_queued.clone();
            self.buffer
                .insert(update.into_injured(), Some(Box::new(move || counter.inc())))
                .await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), QueueError> {
        self.buffer.flush().await
    }

    /// Adapter for [`auklet_changestream::PartitionProcessor`]: shares the
    /// observer behind a mutex and flushes after every record so watermark
    /// advancement never runs ahead of queue persistence.
    pub fn record_fn(observer: Arc<Mutex<SegmentHealthObserver>>) -> RecordFn {
        Arc::new(
            move |record: DataChangeRecord| -> BoxFuture<'static, RecordResult> {
                let observer = observer.clone();
                Box::pin(async move {
                    let mut guard = observer.lock().await;
                    guard.process(&record).await?;
                    guard.flush().await?;
                    Ok(())
                })
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auklet_queue::MemoryQueue;
    use chrono::Utc;
    use prometheus::Registry;
    use serde_json::json;
    use std::time::Duration;

    fn record(mods: Vec<auklet_changestream::RowMod>) -> DataChangeRecord {
        DataChangeRecord {
            commit_timestamp: Utc::now(),
            record_sequence: "1".into(),
            table: SEGMENTS_TABLE.into(),
            mods,
        }
    }

    fn row(stream_id: StreamId, healthy: i64, prev: Option<i64>) -> auklet_changestream::RowMod {
        auklet_changestream::RowMod {
            keys: json!({ "stream_id": stream_id.to_string(), "position": 1 }),
            new_values: json!({
                "pieces_healthy": healthy,
                "pieces_retrievable": healthy + 1,
                "required": 4,
                "repair_threshold": 6,
                "optimal_threshold": 8,
                "placement": 0,
            }),
            old_values: match prev {
                Some(prev) => json!({ "pieces_healthy": prev }),
                None => json!({}),
            },
        }
    }

    fn observer(queue: Arc<MemoryQueue>) -> SegmentHealthObserver {
        let registry = Registry::new();
        SegmentHealthObserver::new(queue, 10, ObserverMetrics::new(&registry).unwrap())
    }

    #[tokio::test]
    async fn queues_segments_dropping_below_threshold() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let mut observer = observer(queue.clone());

        let sick = StreamId::random();
        observer
            .process(&record(vec![row(sick, 5, Some(7))]))
            .await
            .unwrap();
        observer.flush().await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 1);
        let got = queue.select(1, &[], &[]).await.unwrap();
        assert_eq!(got[0].stream_id, sick);
        assert_eq!(got[0].num_normalized_healthy, 5);
        assert_eq!(got[0].segment_health, segment_health(5, 4, 8));
    }

    #[tokio::test]
    async fn ignores_healthy_and_recovering_rows() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let mut observer = observer(queue.clone());

        // above threshold
        observer
            .process(&record(vec![row(StreamId::random(), 7, Some(8))]))
            .await
            .unwrap();
        // at threshold but increasing (a repair just landed)
        observer
            .process(&record(vec![row(StreamId::random(), 6, Some(5))]))
            .await
            .unwrap();
        observer.flush().await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ignores_other_tables_and_malformed_rows() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let mut observer = observer(queue.clone());

        let mut other = record(vec![row(StreamId::random(), 2, Some(9))]);
        other.table = "buckets".into();
        observer.process(&other).await.unwrap();

        observer
            .process(&record(vec![auklet_changestream::RowMod {
                keys: json!({ "stream_id": "not-a-uuid", "position": 1 }),
                new_values: json!({}),
                old_values: json!({}),
            }]))
            .await
            .unwrap();
        observer.flush().await.unwrap();

        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn counts_only_fresh_queue_entries() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        let registry = Registry::new();
        let metrics = ObserverMetrics::new(&registry).unwrap();
        let mut observer = SegmentHealthObserver::new(queue.clone(), 10, metrics.clone());

        let sick = StreamId::random();
        observer
            .process(&record(vec![row(sick, 5, Some(7))]))
            .await
            .unwrap();
        observer.flush().await.unwrap();
        // same segment degrades again: update, not a fresh entry
        observer
            .process(&record(vec![row(sick, 4, Some(5))]))
            .await
            .unwrap();
        observer.flush().await.unwrap();

        assert_eq!(metrics.segments_queued.get(), 1);
        assert_eq!(queue.count().await.unwrap(), 1);
    }
}
