use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use auklet_domain::{NodeId, NodeRecord, Segment};

use crate::classify::PieceSet;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order service failed: {0}")]
    Service(String),

    /// Fewer signed limits than the minimum needed to proceed.
    #[error("insufficient signed limits: wanted {wanted}, got {got}")]
    Insufficient { wanted: usize, got: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    Get,
    Put,
}

/// Signed, time-bounded token authorizing one piece operation against one
/// node. Produced and signed by the external orders service; opaque here.
#[derive(Debug, Clone)]
pub struct OrderLimit {
    pub serial_number: Uuid,
    pub node: NodeId,
    pub piece_number: u16,
    pub action: OrderAction,
    pub expires_at: DateTime<Utc>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct AddressedOrderLimit {
    pub limit: OrderLimit,
    pub address: String,
}

/// One batch of limits, indexed by piece number (`limits[n]` authorizes
/// piece `n`; `None` where limit creation failed or no piece exists).
#[derive(Debug, Clone)]
pub struct OrderBatch {
    pub limits: Vec<Option<AddressedOrderLimit>>,
    /// Piece private key the peer verifies orders against. Opaque.
    pub private_key: Vec<u8>,
}

impl OrderBatch {
    pub fn granted(&self) -> PieceSet {
        self.limits
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(number, _)| number as u16)
            .collect()
    }

    pub fn granted_count(&self) -> usize {
        self.limits.iter().filter(|slot| slot.is_some()).count()
    }
}

/// External orders service: creates cryptographically signed order limits.
#[async_trait]
pub trait OrderService: Send + Sync + 'static {
    /// One slot per piece number of `segment`'s redundancy. A piece in
    /// `pieces` whose slot comes back `None` silently moves from retrievable
    /// to missing.
    async fn create_get_order_limits(
        &self,
        segment: &Segment,
        nodes: &HashMap<NodeId, NodeRecord>,
        pieces: &PieceSet,
    ) -> Result<OrderBatch, OrderError>;

    /// Limits for uploading to `targets` (piece number → node).
    async fn create_put_order_limits(
        &self,
        segment: &Segment,
        targets: &[(u16, NodeRecord)],
    ) -> Result<OrderBatch, OrderError>;
}

/// Stub order service producing unsigned synthetic limits.
///
/// Performs no signing and no I/O; used by tests and local runs. The
/// production implementation lives in the satellite's orders service.
#[derive(Debug, Default, Clone)]
pub struct LocalOrderService;

impl LocalOrderService {
    pub fn new() -> Self {
        Self
    }

    fn limit_for(
        node: &NodeRecord,
        piece_number: u16,
        action: OrderAction,
    ) -> AddressedOrderLimit {
        AddressedOrderLimit {
            limit: OrderLimit {
                serial_number: Uuid::new_v4(),
                node: node.id,
                piece_number,
                action,
                expires_at: Utc::now() + Duration::hours(1),
                signature: Vec::new(),
            },
            address: node.address.clone(),
        }
    }
}

#[async_trait]
impl OrderService for LocalOrderService {
    async fn create_get_order_limits(
        &self,
        segment: &Segment,
        nodes: &HashMap<NodeId, NodeRecord>,
        pieces: &PieceSet,
    ) -> Result<OrderBatch, OrderError> {
        let mut limits = vec![None; segment.redundancy.total as usize];
        for piece in &segment.pieces {
            if !pieces.contains(piece.number) {
                continue;
            }
            if let Some(node) = nodes.get(&piece.node) {
                limits[piece.number as usize] =
                    Some(Self::limit_for(node, piece.number, OrderAction::Get));
            }
        }
        debug!(
            stream_id = %segment.stream_id,
            position = %segment.position,
            granted = limits.iter().filter(|l| l.is_some()).count(),
            "LocalOrderService: get limits"
        );
        Ok(OrderBatch { limits, private_key: Vec::new() })
    }

    async fn create_put_order_limits(
        &self,
        segment: &Segment,
        targets: &[(u16, NodeRecord)],
    ) -> Result<OrderBatch, OrderError> {
        let mut limits = vec![None; segment.redundancy.total as usize];
        for (piece_number, node) in targets {
            limits[*piece_number as usize] =
                Some(Self::limit_for(node, *piece_number, OrderAction::Put));
        }
        Ok(OrderBatch { limits, private_key: Vec::new() })
    }
}
