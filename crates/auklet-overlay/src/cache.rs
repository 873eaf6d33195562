use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use auklet_domain::{NodeId, NodeRecord};

use crate::error::OverlayError;
use crate::overlay::{NewNodeRequest, Overlay};

#[derive(Debug, Default)]
struct CacheState {
    nodes: HashMap<NodeId, NodeRecord>,
    refreshed_at: Option<DateTime<Utc>>,
}

/// Candidate pool fetched from the backing overlay per interval; larger than
/// any single request so exclusion filtering still leaves enough nodes.
const SELECTION_POOL_SIZE: usize = 64;

#[derive(Debug, Default)]
struct SelectionPools {
    // placement → (candidates, refreshed_at)
    pools: HashMap<u16, (Vec<NodeRecord>, DateTime<Utc>)>,
}

/// Read-through cache over an [`Overlay`].
///
/// Node lookups are served from a snapshot that is refreshed once it is older
/// than `interval`. Fresh-node selection draws from a per-placement candidate
/// pool on the same refresh discipline, falling back to a direct query when
/// the pool cannot satisfy a request. When the backing overlay is unavailable
/// either side keeps serving until its snapshot is older than `stale`, after
/// which calls fail instead of returning arbitrarily old node state. Refresh
/// is single-writer; readers share the snapshots through `RwLock`s.
pub struct NodeCache {
    inner: Arc<dyn Overlay>,
    enabled: bool,
    interval: Duration,
    stale: Duration,
    state: RwLock<CacheState>,
    selection: RwLock<SelectionPools>,
    refresh_lock: Mutex<()>,
}

impl NodeCache {
    pub fn new(inner: Arc<dyn Overlay>, enabled: bool, interval: Duration, stale: Duration) -> Self {
        NodeCache {
            inner,
            enabled,
            interval,
            stale,
            state: RwLock::new(CacheState::default()),
            selection: RwLock::new(SelectionPools::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    fn age(&self, refreshed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<chrono::Duration> {
        refreshed_at.map(|t| now.signed_duration_since(t))
    }

    fn within(age: Option<chrono::Duration>, bound: Duration) -> bool {
        match age {
            Some(age) => age <= chrono::Duration::from_std(bound).unwrap_or(chrono::Duration::MAX),
            None => false,
        }
    }

    /// Serve a selection from the cached pool, or `None` when the pool is
    /// absent, older than `bound`, or too small once exclusions are applied.
    async fn select_from_pool(
        &self,
        count: usize,
        request: &NewNodeRequest,
        now: DateTime<Utc>,
        bound: Duration,
    ) -> Option<Vec<NodeRecord>> {
        let pools = self.selection.read().await;
        let (candidates, refreshed_at) = pools.pools.get(&request.placement)?;
        if !Self::within(Some(now.signed_duration_since(*refreshed_at)), bound) {
            return None;
        }
        let selected: Vec<NodeRecord> = candidates
            .iter()
            .filter(|n| !request.excluded.contains(&n.id))
            .take(count)
            .cloned()
            .collect();
        (selected.len() == count).then_some(selected)
    }
}

#[async_trait::async_trait]
impl Overlay for NodeCache {
    async fn get_nodes(
        &self,
        ids: &[NodeId],
    ) -> Result<HashMap<NodeId, NodeRecord>, OverlayError> {
        if !self.enabled {
            return self.inner.get_nodes(ids).await;
        }

        let now = Utc::now();
        {
            let state = self.state.read().await;
            let age = self.age(state.refreshed_at, now);
            if Self::within(age, self.interval)
                && ids.iter().all(|id| state.nodes.contains_key(id))
            {
                return Ok(ids
                    .iter()
                    .filter_map(|id| state.nodes.get(id).map(|n| (*id, n.clone())))
                    .collect());
            }
        }

        // Single-writer refresh; concurrent callers queue here and re-check.
        let _guard = self.refresh_lock.lock().await;
        {
            let state = self.state.read().await;
            let age = self.age(state.refreshed_at, now);
            if Self::within(age, self.interval)
                && ids.iter().all(|id| state.nodes.contains_key(id))
            {
                return Ok(ids
                    .iter()
                    .filter_map(|id| state.nodes.get(id).map(|n| (*id, n.clone())))
                    .collect());
            }
        }

        match self.inner.get_nodes(ids).await {
            Ok(fresh) => {
                let mut state = self.state.write().await;
                for (id, record) in &fresh {
                    state.nodes.insert(*id, record.clone());
                }
                state.refreshed_at = Some(now);
                debug!(fetched = fresh.len(), "node cache refreshed");
                Ok(fresh)
            }
            Err(err) => {
                let state = self.state.read().await;
                let age = self.age(state.refreshed_at, now);
                if Self::within(age, self.stale) {
                    warn!(error = %err, "overlay unavailable, serving cached nodes");
                    Ok(ids
                        .iter()
                        .filter_map(|id| state.nodes.get(id).map(|n| (*id, n.clone())))
                        .collect())
                } else if state.refreshed_at.is_some() {
                    Err(OverlayError::Stale {
                        age_secs: age.map(|a| a.num_seconds()).unwrap_or(i64::MAX),
                    })
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn select_new_nodes(
        &self,
        count: usize,
        request: &NewNodeRequest,
    ) -> Result<Vec<NodeRecord>, OverlayError> {
        if !self.enabled {
            return self.inner.select_new_nodes(count, request).await;
        }

        let now = Utc::now();
        if let Some(selected) = self.select_from_pool(count, request, now, self.interval).await {
            return Ok(selected);
        }

        // Single-writer pool refresh; concurrent callers queue and re-check.
        let _guard = self.refresh_lock.lock().await;
        if let Some(selected) = self.select_from_pool(count, request, now, self.interval).await {
            return Ok(selected);
        }

        let pool_request = NewNodeRequest { excluded: Vec::new(), placement: request.placement };
        match self
            .inner
            .select_new_nodes(SELECTION_POOL_SIZE, &pool_request)
            .await
        {
            Ok(candidates) => {
                {
                    let mut pools = self.selection.write().await;
                    pools
                        .pools
                        .insert(request.placement, (candidates, now));
                }
                debug!(placement = request.placement, "selection pool refreshed");
                match self.select_from_pool(count, request, now, self.interval).await {
                    Some(selected) => Ok(selected),
                    None => self.inner.select_new_nodes(count, request).await,
                }
            }
            // The network is smaller than the pool size; query directly.
            Err(OverlayError::NotEnoughNodes { .. }) => {
                self.inner.select_new_nodes(count, request).await
            }
            Err(err) => {
                if let Some(selected) =
                    self.select_from_pool(count, request, now, self.stale).await
                {
                    warn!(error = %err, "overlay unavailable, selecting from cached pool");
                    Ok(selected)
                } else {
                    Err(err)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryOverlay;
    use std::collections::BTreeMap;

    fn record(b: u8) -> NodeRecord {
        NodeRecord {
            id: NodeId([b; 32]),
            address: format!("node-{b}:7777"),
            last_contact: Some(Utc::now()),
            country_code: "DE".into(),
            last_net: format!("10.0.{b}.0"),
            exiting: false,
            suspended: false,
            tags: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn serves_from_backing_overlay() {
        let overlay = Arc::new(MemoryOverlay::new());
        overlay.add_node(record(1)).await;

        let cache = NodeCache::new(
            overlay,
            true,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );
        let got = cache.get_nodes(&[NodeId([1; 32])]).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn disabled_cache_passes_through() {
        let overlay = Arc::new(MemoryOverlay::new());
        overlay.add_node(record(2)).await;

        let cache = NodeCache::new(
            overlay.clone(),
            false,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );
        let got = cache.get_nodes(&[NodeId([2; 32])]).await.unwrap();
        assert_eq!(got.len(), 1);

        // mutations are visible immediately when the cache is disabled
        overlay.add_node(record(3)).await;
        let got = cache.get_nodes(&[NodeId([3; 32])]).await.unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn selection_falls_back_on_small_networks() {
        let overlay = Arc::new(MemoryOverlay::new());
        for b in 1..=3 {
            overlay.add_node(record(b)).await;
        }

        let cache = NodeCache::new(
            overlay,
            true,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );
        // fewer nodes than the pool size: the direct query path serves
        let selected = cache
            .select_new_nodes(2, &NewNodeRequest::default())
            .await
            .unwrap();
        assert_eq!(selected.len(), 2);

        let err = cache
            .select_new_nodes(5, &NewNodeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OverlayError::NotEnoughNodes { .. }));
    }

    #[tokio::test]
    async fn selection_pool_served_within_interval() {
        let overlay = Arc::new(MemoryOverlay::new());
        for b in 1..=80 {
            overlay.add_node(record(b)).await;
        }

        let cache = NodeCache::new(
            overlay.clone(),
            true,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );
        let first = cache
            .select_new_nodes(1, &NewNodeRequest::default())
            .await
            .unwrap();
        assert_eq!(first[0].id, NodeId([1; 32]));

        // the pool hides the node's departure until the next refresh
        overlay.remove_node(NodeId([1; 32])).await;
        let again = cache
            .select_new_nodes(1, &NewNodeRequest::default())
            .await
            .unwrap();
        assert_eq!(again[0].id, NodeId([1; 32]));

        // exclusions are applied against the cached pool
        let excluded = cache
            .select_new_nodes(
                1,
                &NewNodeRequest { excluded: vec![NodeId([1; 32])], placement: 0 },
            )
            .await
            .unwrap();
        assert_eq!(excluded[0].id, NodeId([2; 32]));
    }

    #[tokio::test]
    async fn cached_snapshot_served_within_interval() {
        let overlay = Arc::new(MemoryOverlay::new());
        overlay.add_node(record(4)).await;

        let cache = NodeCache::new(
            overlay.clone(),
            true,
            Duration::from_secs(300),
            Duration::from_secs(600),
        );
        cache.get_nodes(&[NodeId([4; 32])]).await.unwrap();

        // The snapshot hides subsequent mutations of already-cached ids.
        overlay.remove_node(NodeId([4; 32])).await;
        let got = cache.get_nodes(&[NodeId([4; 32])]).await.unwrap();
        assert_eq!(got.len(), 1, "cached entry served within interval");
    }
}
