use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid stream id: {0}")]
    InvalidStreamId(String),

    #[error("invalid node id: {0}")]
    InvalidNodeId(String),

    #[error("invalid redundancy scheme: {0}")]
    InvalidRedundancy(String),

    #[error("invalid piece set: {0}")]
    InvalidPieces(String),

    #[error("invalid placement: {0}")]
    InvalidPlacement(String),
}
