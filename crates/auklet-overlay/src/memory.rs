use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use auklet_domain::{NodeId, NodeRecord, PlacementRules};

use crate::error::OverlayError;
use crate::overlay::{NewNodeRequest, Overlay};

/// In-memory node directory.
///
/// Selection is deterministic (ordered by node id) so tests can predict
/// upload targets. Suitable for tests and local runs; the production overlay
/// is the satellite's node directory service.
#[derive(Default)]
pub struct MemoryOverlay {
    nodes: Arc<RwLock<HashMap<NodeId, NodeRecord>>>,
    placements: PlacementRules,
}

impl MemoryOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_placements(placements: PlacementRules) -> Self {
        MemoryOverlay { nodes: Arc::default(), placements }
    }

    pub async fn add_node(&self, record: NodeRecord) {
        let mut guard = self.nodes.write().await;
        guard.insert(record.id, record);
    }

    pub async fn remove_node(&self, id: NodeId) {
        let mut guard = self.nodes.write().await;
        guard.remove(&id);
    }
}

#[async_trait]
impl Overlay for MemoryOverlay {
    async fn get_nodes(
        &self,
        ids: &[NodeId],
    ) -> Result<HashMap<NodeId, NodeRecord>, OverlayError> {
        let guard = self.nodes.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| guard.get(id).map(|n| (*id, n.clone())))
            .collect())
    }

    async fn select_new_nodes(
        &self,
        count: usize,
        request: &NewNodeRequest,
    ) -> Result<Vec<NodeRecord>, OverlayError> {
        let rule = self.placements.for_placement(request.placement);
        let guard = self.nodes.read().await;
        let mut candidates: Vec<&NodeRecord> = guard
            .values()
            .filter(|n| !request.excluded.contains(&n.id))
            .filter(|n| !n.exiting && !n.suspended)
            .filter(|n| rule.filter.matches(n))
            .collect();
        candidates.sort_by_key(|n| n.id);

        if candidates.len() < count {
            return Err(OverlayError::NotEnoughNodes {
                wanted: count,
                found: candidates.len(),
            });
        }
        Ok(candidates.into_iter().take(count).cloned().collect())
    }
}
