use std::collections::HashMap;

use async_trait::async_trait;

use auklet_domain::{NodeId, NodeRecord};

use crate::error::OverlayError;

/// Criteria for selecting fresh upload targets.
#[derive(Debug, Clone, Default)]
pub struct NewNodeRequest {
    /// Nodes that already hold a piece of the segment.
    pub excluded: Vec<NodeId>,
    pub placement: u16,
}

/// Node directory operations consumed by the repair core. The production
/// implementation is the satellite's overlay service.
#[async_trait]
pub trait Overlay: Send + Sync + 'static {
    /// Resolve records for the given ids. Ids absent from the result are
    /// unknown to the overlay and their pieces count as missing.
    async fn get_nodes(
        &self,
        ids: &[NodeId],
    ) -> Result<HashMap<NodeId, NodeRecord>, OverlayError>;

    /// Select `count` fresh upload targets matching the request.
    async fn select_new_nodes(
        &self,
        count: usize,
        request: &NewNodeRequest,
    ) -> Result<Vec<NodeRecord>, OverlayError>;
}
