use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use auklet_domain::{Piece, Position, Segment, StreamId};

use crate::error::MetabaseError;
use crate::store::{SegmentStore, UpdateSegmentPieces};

/// In-memory implementation of [`SegmentStore`].
///
/// All data is lost on process exit. Suitable for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentStore {
    inner: Arc<RwLock<HashMap<(StreamId, Position), Segment>>>,
}

impl MemorySegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_segment(&self, segment: Segment) {
        let mut guard = self.inner.write().await;
        guard.insert((segment.stream_id, segment.position), segment);
    }

    pub async fn delete_segment(&self, stream_id: StreamId, position: Position) {
        let mut guard = self.inner.write().await;
        guard.remove(&(stream_id, position));
    }
}

#[async_trait]
impl SegmentStore for MemorySegmentStore {
    async fn get_segment_for_repair(
        &self,
        stream_id: StreamId,
        position: Position,
    ) -> Result<Option<Segment>, MetabaseError> {
        let guard = self.inner.read().await;
        Ok(guard.get(&(stream_id, position)).cloned())
    }

    async fn pieces_altered(
        &self,
        stream_id: StreamId,
        position: Position,
        expected: &[Piece],
    ) -> Result<bool, MetabaseError> {
        let guard = self.inner.read().await;
        match guard.get(&(stream_id, position)) {
            Some(segment) => Ok(segment.pieces != expected),
            None => Err(MetabaseError::SegmentNotFound),
        }
    }

    async fn update_segment_pieces(
        &self,
        update: UpdateSegmentPieces,
    ) -> Result<(), MetabaseError> {
        let mut guard = self.inner.write().await;
        let segment = guard
            .get_mut(&(update.stream_id, update.position))
            .ok_or(MetabaseError::SegmentNotFound)?;
        if segment.pieces != update.old_pieces {
            return Err(MetabaseError::Altered);
        }
        segment.pieces = update.new_pieces;
        segment.redundancy = update.new_redundancy;
        segment.repaired_at = Some(update.new_repaired_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auklet_domain::{ErasureAlgorithm, NodeId, RedundancyScheme};
    use chrono::Utc;

    fn scheme() -> RedundancyScheme {
        RedundancyScheme {
            algorithm: ErasureAlgorithm::ReedSolomon,
            share_size: 256,
            required: 2,
            repair: 3,
            optimal: 4,
            total: 6,
        }
    }

    fn segment(pieces: Vec<Piece>) -> Segment {
        Segment {
            stream_id: StreamId::random(),
            position: Position::new(0, 1),
            created_at: Utc::now(),
            repaired_at: None,
            expires_at: None,
            root_piece_id: uuid::Uuid::new_v4(),
            encrypted_size: 4096,
            redundancy: scheme(),
            pieces,
            placement: 0,
        }
    }

    fn piece(number: u16, b: u8) -> Piece {
        Piece { number, node: NodeId([b; 32]) }
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let store = MemorySegmentStore::new();
        let got = store
            .get_segment_for_repair(StreamId::random(), Position::new(0, 0))
            .await
            .unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn cas_succeeds_with_matching_pieces() {
        let store = MemorySegmentStore::new();
        let seg = segment(vec![piece(0, 1), piece(1, 2)]);
        store.put_segment(seg.clone()).await;

        let new_pieces = vec![piece(0, 1), piece(1, 3), piece(2, 4)];
        store
            .update_segment_pieces(UpdateSegmentPieces {
                stream_id: seg.stream_id,
                position: seg.position,
                old_pieces: seg.pieces.clone(),
                new_redundancy: seg.redundancy,
                new_pieces: new_pieces.clone(),
                new_repaired_at: Utc::now(),
            })
            .await
            .unwrap();

        let got = store
            .get_segment_for_repair(seg.stream_id, seg.position)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.pieces, new_pieces);
        assert!(got.repaired_at.is_some());
    }

    #[tokio::test]
    async fn cas_fails_when_pieces_changed() {
        let store = MemorySegmentStore::new();
        let seg = segment(vec![piece(0, 1)]);
        store.put_segment(seg.clone()).await;

        let err = store
            .update_segment_pieces(UpdateSegmentPieces {
                stream_id: seg.stream_id,
                position: seg.position,
                old_pieces: vec![piece(0, 9)], // stale view
                new_redundancy: seg.redundancy,
                new_pieces: vec![piece(0, 2)],
                new_repaired_at: Utc::now(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, MetabaseError::Altered));

        // metadata unchanged on failed CAS
        let got = store
            .get_segment_for_repair(seg.stream_id, seg.position)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.pieces, seg.pieces);
        assert!(got.repaired_at.is_none());
    }

    #[tokio::test]
    async fn pieces_altered_detects_change() {
        let store = MemorySegmentStore::new();
        let seg = segment(vec![piece(0, 1)]);
        store.put_segment(seg.clone()).await;

        assert!(!store
            .pieces_altered(seg.stream_id, seg.position, &seg.pieces)
            .await
            .unwrap());
        assert!(store
            .pieces_altered(seg.stream_id, seg.position, &[piece(0, 7)])
            .await
            .unwrap());
    }
}
