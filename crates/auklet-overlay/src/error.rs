use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverlayError {
    /// The placement engine could not satisfy the requested node count.
    /// Repairs fail without marking the segment repaired; the queue retries.
    #[error("not enough nodes: wanted {wanted}, found {found}")]
    NotEnoughNodes { wanted: usize, found: usize },

    /// Cached node data is older than the configured hard-block threshold.
    #[error("node cache stale: last refresh {age_secs}s ago")]
    Stale { age_secs: i64 },

    #[error("overlay query failed: {0}")]
    Query(String),
}
