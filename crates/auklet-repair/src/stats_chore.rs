use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use auklet_config::StatsConfig;
use auklet_queue::{QueueStat, RepairQueue};

use crate::metrics::QueueMetrics;

/// Periodically aggregates queue statistics into gauges.
///
/// When the last successful refresh is older than the configured staleness
/// threshold, per-group gauges are not published: a frozen `age_of_stat`
/// value is the staleness signal, and stale numbers would otherwise look
/// current.
pub struct QueueStatsChore {
    queue: Arc<dyn RepairQueue>,
    config: StatsConfig,
    metrics: QueueMetrics,
    last: Mutex<Option<(DateTime<Utc>, Vec<QueueStat>)>>,
}

impl QueueStatsChore {
    pub fn new(queue: Arc<dyn RepairQueue>, config: StatsConfig, metrics: QueueMetrics) -> Self {
        QueueStatsChore { queue, config, metrics, last: Mutex::new(None) }
    }

    pub async fn run(&self, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }
    }

    pub async fn tick(&self) {
        match self.queue.stat().await {
            Ok(stats) => {
                let mut last = self.last.lock().await;
                *last = Some((Utc::now(), stats));
            }
            Err(e) => warn!(error = %e, "queue stat refresh failed"),
        }
        self.publish().await;
    }

    async fn publish(&self) {
        let last = self.last.lock().await;
        let Some((refreshed_at, stats)) = last.as_ref() else {
            return;
        };

        let now = Utc::now();
        let age = now.signed_duration_since(*refreshed_at);
        self.metrics.age_of_stat_seconds.set(age.num_seconds());

        let staleness =
            chrono::Duration::from_std(self.config.staleness()).unwrap_or(chrono::Duration::MAX);
        if age > staleness {
            debug!(age_secs = age.num_seconds(), "queue stats stale, not publishing");
            return;
        }

        let mut depth: i64 = 0;
        for stat in stats {
            depth += stat.count;
            let placement = stat.placement.to_string();
            let attempted = if stat.attempted { "true" } else { "false" };
            let labels = [placement.as_str(), attempted];

            self.metrics.count.with_label_values(&labels).set(stat.count);
            self.metrics
                .since_oldest_inserted_seconds
                .with_label_values(&labels)
                .set(now.signed_duration_since(stat.min_inserted_at).num_seconds());
            self.metrics
                .since_latest_inserted_seconds
                .with_label_values(&labels)
                .set(now.signed_duration_since(stat.max_inserted_at).num_seconds());
            if let Some(oldest) = stat.min_attempted_at {
                self.metrics
                    .since_oldest_attempted_seconds
                    .with_label_values(&labels)
                    .set(now.signed_duration_since(oldest).num_seconds());
            }
            if let Some(latest) = stat.max_attempted_at {
                self.metrics
                    .since_latest_attempted_seconds
                    .with_label_values(&labels)
                    .set(now.signed_duration_since(latest).num_seconds());
            }
            self.metrics
                .min_segment_health
                .with_label_values(&labels)
                .set(stat.min_segment_health);
            self.metrics
                .max_segment_health
                .with_label_values(&labels)
                .set(stat.max_segment_health);
        }
        self.metrics.depth.set(depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auklet_domain::{InjuredSegment, Position, StreamId};
    use auklet_queue::MemoryQueue;
    use prometheus::Registry;
    use std::time::Duration;

    fn injured(index: u32, placement: u16, health: f64) -> InjuredSegment {
        InjuredSegment {
            stream_id: StreamId::random(),
            position: Position::new(0, index),
            segment_health: health,
            placement,
            attempted_at: None,
            updated_at: Utc::now(),
            inserted_at: Utc::now(),
            num_normalized_healthy: 0,
            num_normalized_retrievable: 0,
            num_out_of_placement: 0,
        }
    }

    #[tokio::test]
    async fn publishes_per_placement_gauges() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        queue.insert(&injured(1, 1, 2.5)).await.unwrap();
        queue.insert(&injured(2, 1, 4.0)).await.unwrap();
        queue.insert(&injured(3, 2, 1.0)).await.unwrap();

        let registry = Registry::new();
        let metrics = QueueMetrics::new(&registry).unwrap();
        let chore = QueueStatsChore::new(queue, StatsConfig::default(), metrics.clone());
        chore.tick().await;

        assert_eq!(metrics.depth.get(), 3);
        assert_eq!(metrics.count.with_label_values(&["1", "false"]).get(), 2);
        assert_eq!(metrics.count.with_label_values(&["2", "false"]).get(), 1);
        assert_eq!(
            metrics
                .min_segment_health
                .with_label_values(&["1", "false"])
                .get(),
            2.5
        );
    }

    #[tokio::test]
    async fn stale_stats_are_not_published() {
        let queue = Arc::new(MemoryQueue::new(Duration::from_secs(3600)));
        queue.insert(&injured(1, 1, 2.5)).await.unwrap();

        let registry = Registry::new();
        let metrics = QueueMetrics::new(&registry).unwrap();
        let config = StatsConfig { interval_secs: 60, staleness_secs: 0 };
        let chore = QueueStatsChore::new(queue, config, metrics.clone());

        // Force a snapshot that is already past the (zero) staleness window.
        {
            let mut last = chore.last.lock().await;
            *last = Some((Utc::now() - chrono::Duration::seconds(5), Vec::new()));
        }
        chore.publish().await;

        assert!(metrics.age_of_stat_seconds.get() >= 5, "age gauge still moves");
        assert_eq!(metrics.count.with_label_values(&["1", "false"]).get(), 0);
    }
}
