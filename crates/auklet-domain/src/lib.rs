pub mod error;
pub mod node;
pub mod placement;
pub mod types;


pub use error::DomainError;
pub use node::NodeRecord;
pub use placement::{NodeFilter, PlacementRule, PlacementRules, DEFAULT_PLACEMENT};
pub use types::{
    segment_health, ErasureAlgorithm, InjuredSegment, NodeId, Piece, Position,
    RedundancyScheme, Segment, StreamId,
};
