use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use auklet_domain::{InjuredSegment, Position, StreamId};

use crate::error::QueueError;
use crate::queue::{QueueStat, RepairQueue};

/// In-memory implementation of [`RepairQueue`].
///
/// Orders selection by ascending `segment_health`, then ascending
/// `attempted_at` with never-attempted entries first (health ordering:
/// supported). All data is lost on process exit; suitable for tests and
/// local runs.
pub struct MemoryQueue {
    attempt_interval: chrono::Duration,
    inner: Arc<Mutex<HashMap<(StreamId, Position), InjuredSegment>>>,
}

impl MemoryQueue {
    pub fn new(attempt_interval: Duration) -> Self {
        MemoryQueue {
            attempt_interval: chrono::Duration::from_std(attempt_interval)
                .unwrap_or(chrono::Duration::MAX),
            inner: Arc::default(),
        }
    }
}

fn upsert(
    entries: &mut HashMap<(StreamId, Position), InjuredSegment>,
    segment: &InjuredSegment,
    now: DateTime<Utc>,
) -> bool {
    match entries.get_mut(&segment.key()) {
        Some(existing) => {
            existing.updated_at = now;
            if segment.segment_health < existing.segment_health {
                existing.segment_health = segment.segment_health;
                existing.placement = segment.placement;
                existing.num_normalized_healthy = segment.num_normalized_healthy;
                existing.num_normalized_retrievable = segment.num_normalized_retrievable;
                existing.num_out_of_placement = segment.num_out_of_placement;
            }
            true
        }
        None => {
            let mut fresh = segment.clone();
            fresh.attempted_at = None;
            fresh.inserted_at = now;
            fresh.updated_at = now;
            entries.insert(fresh.key(), fresh);
            false
        }
    }
}

#[async_trait]
impl RepairQueue for MemoryQueue {
    async fn insert(&self, segment: &InjuredSegment) -> Result<bool, QueueError> {
        let mut entries = self.inner.lock().await;
        Ok(upsert(&mut entries, segment, Utc::now()))
    }

    async fn insert_batch(
        &self,
        segments: &[InjuredSegment],
    ) -> Result<Vec<InjuredSegment>, QueueError> {
        let mut entries = self.inner.lock().await;
        let now = Utc::now();
        let mut fresh = Vec::new();
        for segment in segments {
            if !upsert(&mut entries, segment, now) {
                fresh.push(segment.clone());
            }
        }
        Ok(fresh)
    }

    async fn select(
        &self,
        limit: usize,
        included_placements: &[u16],
        excluded_placements: &[u16],
    ) -> Result<Vec<InjuredSegment>, QueueError> {
        let mut entries = self.inner.lock().await;
        let now = Utc::now();
        let cutoff = now - self.attempt_interval;

        let mut eligible: Vec<(StreamId, Position)> = entries
            .values()
            .filter(|s| s.attempted_at.is_none_or(|t| t < cutoff))
            .filter(|s| !excluded_placements.contains(&s.placement))
            .filter(|s| {
                included_placements.is_empty() || included_placements.contains(&s.placement)
            })
            .map(|s| s.key())
            .collect();
        eligible.sort_by(|a, b| {
            let sa = &entries[a];
            let sb = &entries[b];
            sa.segment_health
                .total_cmp(&sb.segment_health)
                // None (never attempted) sorts before Some
                .then_with(|| sa.attempted_at.cmp(&sb.attempted_at))
        });

        let mut selected = Vec::new();
        for key in eligible.into_iter().take(limit) {
            if let Some(entry) = entries.get_mut(&key) {
                entry.attempted_at = Some(now);
                selected.push(entry.clone());
            }
        }
        Ok(selected)
    }

    async fn release(&self, segment: &InjuredSegment, repaired: bool) -> Result<(), QueueError> {
        let mut entries = self.inner.lock().await;
        if repaired {
            entries.remove(&segment.key());
        } else if let Some(entry) = entries.get_mut(&segment.key()) {
            entry.attempted_at = None;
        }
        Ok(())
    }

    async fn clean(&self, before: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut entries = self.inner.lock().await;
        let len_before = entries.len();
        entries.retain(|_, s| s.updated_at >= before);
        Ok((len_before - entries.len()) as u64)
    }

    async fn count(&self) -> Result<usize, QueueError> {
        let entries = self.inner.lock().await;
        Ok(entries.len())
    }

    async fn stat(&self) -> Result<Vec<QueueStat>, QueueError> {
        let entries = self.inner.lock().await;
        let mut groups: HashMap<(u16, bool), Vec<&InjuredSegment>> = HashMap::new();
        for segment in entries.values() {
            groups
                .entry((segment.placement, segment.attempted_at.is_some()))
                .or_default()
                .push(segment);
        }

        let mut stats: Vec<QueueStat> = groups
            .into_iter()
            .map(|((placement, attempted), group)| QueueStat {
                placement,
                attempted,
                count: group.len() as i64,
                min_inserted_at: group.iter().map(|s| s.inserted_at).min().unwrap_or_default(),
                max_inserted_at: group.iter().map(|s| s.inserted_at).max().unwrap_or_default(),
                min_attempted_at: group.iter().filter_map(|s| s.attempted_at).min(),
                max_attempted_at: group.iter().filter_map(|s| s.attempted_at).max(),
                min_segment_health: group
                    .iter()
                    .map(|s| s.segment_health)
                    .fold(f64::INFINITY, f64::min),
                max_segment_health: group
                    .iter()
                    .map(|s| s.segment_health)
                    .fold(f64::NEG_INFINITY, f64::max),
            })
            .collect();
        stats.sort_by_key(|s| (s.placement, s.attempted));
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MemoryQueue {
        MemoryQueue::new(Duration::from_secs(6 * 60 * 60))
    }

    fn injured(health: f64) -> InjuredSegment {
        injured_at(StreamId::random(), Position::new(0, 0), health)
    }

    fn injured_at(stream_id: StreamId, position: Position, health: f64) -> InjuredSegment {
        InjuredSegment {
            stream_id,
            position,
            segment_health: health,
            placement: 0,
            attempted_at: None,
            updated_at: Utc::now(),
            inserted_at: Utc::now(),
            num_normalized_healthy: 0,
            num_normalized_retrievable: 0,
            num_out_of_placement: 0,
        }
    }

    #[tokio::test]
    async fn selects_lowest_health_first() {
        let q = queue();
        let a = injured(10.0);
        let b = injured(7.0);
        let c = injured(9.0);
        for seg in [&a, &b, &c] {
            assert!(!q.insert(seg).await.unwrap());
        }

        let got = q.select(1, &[], &[]).await.unwrap();
        assert_eq!(got[0].key(), b.key());
        q.release(&got[0], true).await.unwrap();

        let got = q.select(1, &[], &[]).await.unwrap();
        assert_eq!(got[0].key(), c.key());
        q.release(&got[0], true).await.unwrap();

        let got = q.select(1, &[], &[]).await.unwrap();
        assert_eq!(got[0].key(), a.key());
    }

    #[tokio::test]
    async fn reinsert_keeps_minimum_health() {
        let q = queue();
        let mut a = injured(10.0);
        q.insert(&a).await.unwrap();
        a.segment_health = 8.0;
        assert!(q.insert(&a).await.unwrap(), "second insert is a duplicate");
        assert_eq!(q.count().await.unwrap(), 1);

        let got = q.select(1, &[], &[]).await.unwrap();
        assert_eq!(got[0].segment_health, 8.0);

        // re-insert with higher health is idempotent
        a.segment_health = 12.0;
        q.insert(&a).await.unwrap();
        q.release(&got[0], false).await.unwrap();
        let got = q.select(1, &[], &[]).await.unwrap();
        assert_eq!(got[0].segment_health, 8.0);
    }

    #[tokio::test]
    async fn selected_entries_are_not_reselectable() {
        let q = queue();
        q.insert(&injured(1.0)).await.unwrap();

        let first = q.select(10, &[], &[]).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = q.select(10, &[], &[]).await.unwrap();
        assert!(second.is_empty(), "attempted entry must not be re-selected");
    }

    #[tokio::test]
    async fn released_unrepaired_is_immediately_selectable() {
        let q = queue();
        q.insert(&injured(1.0)).await.unwrap();

        let got = q.select(1, &[], &[]).await.unwrap();
        q.release(&got[0], false).await.unwrap();
        let again = q.select(1, &[], &[]).await.unwrap();
        assert_eq!(again.len(), 1);
    }

    #[tokio::test]
    async fn released_repaired_is_gone() {
        let q = queue();
        q.insert(&injured(1.0)).await.unwrap();
        let got = q.select(1, &[], &[]).await.unwrap();
        q.release(&got[0], true).await.unwrap();
        assert_eq!(q.count().await.unwrap(), 0);
        assert!(q.select(1, &[], &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_selects_never_overlap() {
        let q = Arc::new(queue());
        for i in 0..20 {
            q.insert(&injured_at(StreamId::random(), Position::new(0, i), i as f64))
                .await
                .unwrap();
        }

        let (a, b) = tokio::join!(q.select(10, &[], &[]), q.select(10, &[], &[]));
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.len() + b.len(), 20);
        for seg in &a {
            assert!(!b.iter().any(|other| other.key() == seg.key()));
        }
    }

    #[tokio::test]
    async fn placement_filters() {
        let q = queue();
        let mut eu = injured(1.0);
        eu.placement = 1;
        let mut us = injured(2.0);
        us.placement = 2;
        q.insert(&eu).await.unwrap();
        q.insert(&us).await.unwrap();

        let got = q.select(10, &[], &[1]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].placement, 2);

        q.release(&got[0], false).await.unwrap();
        let got = q.select(10, &[1], &[]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].placement, 1);
    }

    #[tokio::test]
    async fn clean_removes_stale_entries() {
        let q = queue();
        q.insert(&injured(1.0)).await.unwrap();
        q.insert(&injured(2.0)).await.unwrap();

        let mid = Utc::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        q.insert(&injured(3.0)).await.unwrap();

        assert_eq!(q.clean(mid).await.unwrap(), 2);
        assert_eq!(q.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn insert_batch_reports_only_new() {
        let q = queue();
        let a = injured(1.0);
        let b = injured(2.0);
        q.insert(&a).await.unwrap();

        let fresh = q.insert_batch(&[a.clone(), b.clone()]).await.unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].key(), b.key());
    }

    #[tokio::test]
    async fn stat_groups_by_placement_and_attempted() {
        let q = queue();
        let mut a = injured(1.0);
        a.placement = 1;
        let mut b = injured(5.0);
        b.placement = 1;
        let mut c = injured(3.0);
        c.placement = 2;
        for seg in [&a, &b, &c] {
            q.insert(seg).await.unwrap();
        }
        // claim one placement-1 entry so it lands in the attempted group
        let got = q.select(1, &[1], &[]).await.unwrap();
        assert_eq!(got[0].key(), a.key());

        let stats = q.stat().await.unwrap();
        assert_eq!(stats.len(), 3);
        let unattempted_p1 = stats
            .iter()
            .find(|s| s.placement == 1 && !s.attempted)
            .unwrap();
        assert_eq!(unattempted_p1.count, 1);
        assert_eq!(unattempted_p1.min_segment_health, 5.0);
        let attempted_p1 = stats
            .iter()
            .find(|s| s.placement == 1 && s.attempted)
            .unwrap();
        assert_eq!(attempted_p1.count, 1);
        assert!(attempted_p1.min_attempted_at.is_some());
    }
}
