use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PartitionStoreError;
use crate::partition::PartitionState;

/// Crash-safe partition metadata, scoped per feed.
///
/// Every mutating operation is a single-statement transaction: partial
/// application is impossible.
#[async_trait]
pub trait PartitionStore: Send + Sync + 'static {
    /// True iff no rows exist for this feed. Used to detect first-run.
    async fn has_no_partitions(&self, feed: &str) -> Result<bool, PartitionStoreError>;

    /// Snapshot read of token → watermark for all partitions in `state`.
    async fn get_partitions_by_state(
        &self,
        feed: &str,
        state: PartitionState,
    ) -> Result<HashMap<String, DateTime<Utc>>, PartitionStoreError>;

    /// Insert a `Created` partition with `watermark = start_timestamp`.
    /// Inserting an already-present token is a no-op: change-stream merges
    /// make multiple parents insert the same child.
    async fn add_child_partition(
        &self,
        feed: &str,
        token: &str,
        parent_tokens: &[String],
        start_timestamp: DateTime<Utc>,
    ) -> Result<(), PartitionStoreError>;

    /// Atomically promote every `Created` partition whose scheduling
    /// precondition holds to `Scheduled`, stamping `scheduled_at`. A
    /// partition qualifies when every parent is `Finished`, OR it is the
    /// genesis partition, OR it has no parents and the genesis is `Finished`.
    /// Returns the number of promoted partitions.
    async fn schedule_partitions(&self, feed: &str) -> Result<u64, PartitionStoreError>;

    /// Fails with [`PartitionStoreError::NoSuchPartition`] if zero rows match.
    /// The watermark never moves backwards.
    async fn update_watermark(
        &self,
        feed: &str,
        token: &str,
        watermark: DateTime<Utc>,
    ) -> Result<(), PartitionStoreError>;

    /// Stamps the matching timestamp column with the commit time. Target
    /// state `Created` is rejected.
    async fn update_state(
        &self,
        feed: &str,
        token: &str,
        state: PartitionState,
    ) -> Result<(), PartitionStoreError>;
}
