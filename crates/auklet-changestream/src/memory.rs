use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::PartitionStoreError;
use crate::partition::{Partition, PartitionState, GENESIS_TOKEN};
use crate::store::PartitionStore;

/// In-memory implementation of [`PartitionStore`].
///
/// Implements the same scheduling precondition as the Postgres backend.
/// All data is lost on process exit; suitable for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryPartitionStore {
    // feed → token → partition
    inner: Arc<Mutex<HashMap<String, HashMap<String, Partition>>>>,
}

impl MemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one partition row, for tests and inspection.
    pub async fn get_partition(&self, feed: &str, token: &str) -> Option<Partition> {
        let guard = self.inner.lock().await;
        guard.get(feed).and_then(|m| m.get(token)).cloned()
    }

    fn ready_to_schedule(partitions: &HashMap<String, Partition>, p: &Partition) -> bool {
        if p.token == GENESIS_TOKEN {
            return true;
        }
        if p.parent_tokens.is_empty() {
            return partitions
                .get(GENESIS_TOKEN)
                .is_some_and(|g| g.state == PartitionState::Finished);
        }
        p.parent_tokens.iter().all(|parent| {
            partitions
                .get(parent)
                .is_some_and(|q| q.state == PartitionState::Finished)
        })
    }
}

#[async_trait]
impl PartitionStore for MemoryPartitionStore {
    async fn has_no_partitions(&self, feed: &str) -> Result<bool, PartitionStoreError> {
        let guard = self.inner.lock().await;
        Ok(guard.get(feed).is_none_or(|m| m.is_empty()))
    }

    async fn get_partitions_by_state(
        &self,
        feed: &str,
        state: PartitionState,
    ) -> Result<HashMap<String, DateTime<Utc>>, PartitionStoreError> {
        let guard = self.inner.lock().await;
        Ok(guard
            .get(feed)
            .map(|m| {
                m.values()
                    .filter(|p| p.state == state)
                    .map(|p| (p.token.clone(), p.watermark))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn add_child_partition(
        &self,
        feed: &str,
        token: &str,
        parent_tokens: &[String],
        start_timestamp: DateTime<Utc>,
    ) -> Result<(), PartitionStoreError> {
        let mut guard = self.inner.lock().await;
        let partitions = guard.entry(feed.to_string()).or_default();
        if partitions.contains_key(token) {
            // merge scenario: a second parent inserted the same child
            return Ok(());
        }
        partitions.insert(
            token.to_string(),
            Partition {
                token: token.to_string(),
                parent_tokens: parent_tokens.to_vec(),
                start_timestamp,
                watermark: start_timestamp,
                state: PartitionState::Created,
                created_at: Utc::now(),
                scheduled_at: None,
                running_at: None,
                finished_at: None,
            },
        );
        Ok(())
    }

    async fn schedule_partitions(&self, feed: &str) -> Result<u64, PartitionStoreError> {
        let mut guard = self.inner.lock().await;
        let Some(partitions) = guard.get_mut(feed) else {
            return Ok(0);
        };
        let ready: Vec<String> = {
            let view: &HashMap<String, Partition> = partitions;
            view.values()
                .filter(|p| p.state == PartitionState::Created)
                .filter(|p| Self::ready_to_schedule(view, p))
                .map(|p| p.token.clone())
                .collect()
        };
        let now = Utc::now();
        for token in &ready {
            if let Some(p) = partitions.get_mut(token) {
                p.state = PartitionState::Scheduled;
                p.scheduled_at = Some(now);
            }
        }
        Ok(ready.len() as u64)
    }

    async fn update_watermark(
        &self,
        feed: &str,
        token: &str,
        watermark: DateTime<Utc>,
    ) -> Result<(), PartitionStoreError> {
        let mut guard = self.inner.lock().await;
        let p = guard
            .get_mut(feed)
            .and_then(|m| m.get_mut(token))
            .ok_or_else(|| PartitionStoreError::NoSuchPartition(token.to_string()))?;
        if watermark > p.watermark {
            p.watermark = watermark;
        }
        Ok(())
    }

    async fn update_state(
        &self,
        feed: &str,
        token: &str,
        state: PartitionState,
    ) -> Result<(), PartitionStoreError> {
        if state == PartitionState::Created {
            return Err(PartitionStoreError::InvalidState(state));
        }
        let mut guard = self.inner.lock().await;
        let p = guard
            .get_mut(feed)
            .and_then(|m| m.get_mut(token))
            .ok_or_else(|| PartitionStoreError::NoSuchPartition(token.to_string()))?;
        let now = Utc::now();
        p.state = state;
        match state {
            PartitionState::Scheduled => p.scheduled_at = Some(now),
            PartitionState::Running => p.running_at = Some(now),
            PartitionState::Finished => p.finished_at = Some(now),
            PartitionState::Created => unreachable!("rejected above"),
        }
        Ok(())
    }
}
