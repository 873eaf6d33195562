use async_trait::async_trait;
use chrono::{DateTime, Utc};

use auklet_domain::{Piece, Position, RedundancyScheme, Segment, StreamId};

use crate::error::MetabaseError;

/// Compare-and-swap update of a segment's piece set after repair.
#[derive(Debug, Clone)]
pub struct UpdateSegmentPieces {
    pub stream_id: StreamId,
    pub position: Position,
    /// Pieces as read before the repair; the update applies only if the
    /// stored pieces still equal these.
    pub old_pieces: Vec<Piece>,
    pub new_redundancy: RedundancyScheme,
    pub new_pieces: Vec<Piece>,
    pub new_repaired_at: DateTime<Utc>,
}

/// Segment metadata operations consumed by the repair core. The production
/// implementation lives in the satellite's metainfo database; this subsystem
/// only depends on the operations below.
#[async_trait]
pub trait SegmentStore: Send + Sync + 'static {
    /// Fetch a segment for repair. `None` means it was deleted upstream.
    async fn get_segment_for_repair(
        &self,
        stream_id: StreamId,
        position: Position,
    ) -> Result<Option<Segment>, MetabaseError>;

    /// True iff the stored pieces differ from `expected`.
    async fn pieces_altered(
        &self,
        stream_id: StreamId,
        position: Position,
        expected: &[Piece],
    ) -> Result<bool, MetabaseError>;

    /// Atomically swap the piece set. Fails with [`MetabaseError::Altered`]
    /// when the stored pieces no longer match `old_pieces`, and
    /// [`MetabaseError::SegmentNotFound`] when the segment is gone.
    async fn update_segment_pieces(
        &self,
        update: UpdateSegmentPieces,
    ) -> Result<(), MetabaseError>;
}
