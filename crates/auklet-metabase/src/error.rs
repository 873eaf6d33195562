use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetabaseError {
    #[error("segment not found")]
    SegmentNotFound,

    /// Compare-and-swap failed: the segment's pieces changed since they were
    /// read. The caller's repair result must be discarded.
    #[error("segment pieces altered concurrently")]
    Altered,

    #[error("internal metabase error: {0}")]
    Internal(String),
}
