use async_trait::async_trait;
use chrono::{DateTime, Utc};

use auklet_domain::InjuredSegment;

use crate::error::QueueError;

/// Per-(placement, attempted) aggregate reported by [`RepairQueue::stat`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStat {
    pub placement: u16,
    /// True for the group of entries with a non-null `attempted_at`.
    pub attempted: bool,
    pub count: i64,
    pub min_inserted_at: DateTime<Utc>,
    pub max_inserted_at: DateTime<Utc>,
    pub min_attempted_at: Option<DateTime<Utc>>,
    pub max_attempted_at: Option<DateTime<Utc>>,
    pub min_segment_health: f64,
    pub max_segment_health: f64,
}

/// Health-ordered queue of segments awaiting repair.
///
/// At most one entry exists per `(stream_id, position)`; a surviving entry's
/// health equals the minimum ever inserted for it. Whether a backend orders
/// selection by health is documented per implementation.
#[async_trait]
pub trait RepairQueue: Send + Sync + 'static {
    /// Upsert one segment. Returns true iff an entry already existed. An
    /// existing entry's health is only overwritten downwards (the segment
    /// became less healthy); `updated_at` is refreshed either way.
    async fn insert(&self, segment: &InjuredSegment) -> Result<bool, QueueError>;

    /// Upsert many segments, returning the subset that were freshly created
    /// (not updates of existing entries).
    async fn insert_batch(
        &self,
        segments: &[InjuredSegment],
    ) -> Result<Vec<InjuredSegment>, QueueError>;

    /// Atomically claim up to `limit` of the most urgent entries, stamping
    /// `attempted_at` so they are not re-selectable until the backend's
    /// attempt interval has passed. Two concurrent selects never return
    /// overlapping sets. Pieces in `excluded_placements` are skipped; when
    /// `included_placements` is non-empty only those are eligible.
    async fn select(
        &self,
        limit: usize,
        included_placements: &[u16],
        excluded_placements: &[u16],
    ) -> Result<Vec<InjuredSegment>, QueueError>;

    /// If `repaired`, delete the entry; otherwise clear `attempted_at`,
    /// making it immediately re-selectable. The sole path by which in-flight
    /// entries return to the queue.
    async fn release(&self, segment: &InjuredSegment, repaired: bool) -> Result<(), QueueError>;

    /// Remove every entry with `updated_at < before`; returns how many.
    async fn clean(&self, before: DateTime<Utc>) -> Result<u64, QueueError>;

    async fn count(&self) -> Result<usize, QueueError>;

    async fn stat(&self) -> Result<Vec<QueueStat>, QueueError>;
}
