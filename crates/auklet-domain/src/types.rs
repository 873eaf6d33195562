use std::collections::HashSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Identifies one object stream. Globally unique.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new(id: Uuid) -> Self {
        StreamId(id)
    }

    pub fn random() -> Self {
        StreamId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(StreamId)
            .map_err(|e| DomainError::InvalidStreamId(format!("{s}: {e}")))
    }
}

/// Position of a segment within its stream: part number plus index within the
/// part, encoded together as a single `u64` (part in the high 32 bits) so the
/// encoded form orders the same way as `(part, index)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Position {
    pub part: u32,
    pub index: u32,
}

impl Position {
    pub fn new(part: u32, index: u32) -> Self {
        Position { part, index }
    }

    pub fn encode(self) -> u64 {
        ((self.part as u64) << 32) | self.index as u64
    }

    pub fn decode(v: u64) -> Self {
        Position {
            part: (v >> 32) as u32,
            index: v as u32,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.part, self.index)
    }
}

/// 256-bit storage node identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl FromStr for NodeId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(DomainError::InvalidNodeId(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex = std::str::from_utf8(chunk)
                .map_err(|_| DomainError::InvalidNodeId(s.to_string()))?;
            bytes[i] = u8::from_str_radix(hex, 16)
                .map_err(|_| DomainError::InvalidNodeId(s.to_string()))?;
        }
        Ok(NodeId(bytes))
    }
}

// ── Redundancy ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErasureAlgorithm {
    #[default]
    ReedSolomon,
}

/// Erasure-coding parameters for one segment.
///
/// `required` (k) shares reconstruct the data, `repair` (r) is the trigger
/// threshold, `optimal` (o) the post-repair target, `total` (n) the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyScheme {
    pub algorithm: ErasureAlgorithm,
    pub share_size: u32,
    pub required: u16,
    pub repair: u16,
    pub optimal: u16,
    pub total: u16,
}

impl RedundancyScheme {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.required == 0 {
            return Err(DomainError::InvalidRedundancy("required must be > 0".into()));
        }
        if !(self.required <= self.repair
            && self.repair <= self.optimal
            && self.optimal <= self.total)
        {
            return Err(DomainError::InvalidRedundancy(format!(
                "want k <= r <= o <= n, got k={} r={} o={} n={}",
                self.required, self.repair, self.optimal, self.total
            )));
        }
        Ok(())
    }
}

// ── Segment metadata ──────────────────────────────────────────────────────────

/// One erasure-coded share of a segment, held by exactly one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Piece {
    pub number: u16,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub stream_id: StreamId,
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub repaired_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub root_piece_id: Uuid,
    pub encrypted_size: i64,
    pub redundancy: RedundancyScheme,
    pub pieces: Vec<Piece>,
    pub placement: u16,
}

impl Segment {
    /// At most `total` pieces, every piece number below `total`, numbers unique.
    pub fn validate_pieces(&self) -> Result<(), DomainError> {
        if self.pieces.len() > self.redundancy.total as usize {
            return Err(DomainError::InvalidPieces(format!(
                "{} pieces exceeds total {}",
                self.pieces.len(),
                self.redundancy.total
            )));
        }
        let mut seen = HashSet::new();
        for piece in &self.pieces {
            if piece.number >= self.redundancy.total {
                return Err(DomainError::InvalidPieces(format!(
                    "piece number {} out of range (total {})",
                    piece.number, self.redundancy.total
                )));
            }
            if !seen.insert(piece.number) {
                return Err(DomainError::InvalidPieces(format!(
                    "duplicate piece number {}",
                    piece.number
                )));
            }
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t < now)
    }

    /// True when the segment has no remote pieces (stored inline with the
    /// metadata). Inline segments never reach the repair path.
    pub fn is_inline(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn piece_nodes(&self) -> Vec<NodeId> {
        self.pieces.iter().map(|p| p.node).collect()
    }
}

// ── Injured segment ───────────────────────────────────────────────────────────

/// One repair queue entry.
///
/// `(stream_id, position)` uniquely identifies an entry; re-insert with lower
/// health overwrites, re-insert with equal-or-higher health is idempotent.
/// Lower `segment_health` means more urgent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjuredSegment {
    pub stream_id: StreamId,
    pub position: Position,
    pub segment_health: f64,
    pub placement: u16,
    pub attempted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub inserted_at: DateTime<Utc>,
    #[serde(default)]
    pub num_normalized_healthy: i32,
    #[serde(default)]
    pub num_normalized_retrievable: i32,
    #[serde(default)]
    pub num_out_of_placement: i32,
}

impl InjuredSegment {
    pub fn key(&self) -> (StreamId, Position) {
        (self.stream_id, self.position)
    }
}

/// Scalar summary of how close a segment is to unrecoverable; lower is more
/// urgent. Normalized surplus of healthy pieces over the reconstruction
/// minimum, scaled by the repair band.
pub fn segment_health(healthy: i32, required: i32, optimal: i32) -> f64 {
    let span = (optimal - required).max(1) as f64;
    (healthy - required) as f64 / span
}
