use thiserror::Error;

/// Failure taxonomy of one repair attempt.
///
/// [`RepairError::should_delete`] encodes the propagation policy: fatal
/// contradictions remove the segment from the queue, everything else leaves
/// it queued for retry after the attempt interval.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("metadata get failed: {0}")]
    MetadataGet(String),

    #[error("metadata put failed: {0}")]
    MetadataPut(String),

    /// Logical contradiction (inline segment, invalid redundancy). The queue
    /// entry is garbage; remove it.
    #[error("invalid repair: {0}")]
    InvalidRepair(String),

    #[error("overlay query failed: {0}")]
    OverlayQuery(String),

    /// The placement engine could not provide enough fresh upload targets.
    #[error("not enough nodes for repair: {0}")]
    NotEnoughNodes(String),

    #[error("order limit failure: {0}")]
    OrderLimit(String),

    #[error("piece download failed: {0}")]
    Download(String),

    /// Erasure decode failed despite sufficient pieces: corruption. Remove
    /// from the queue; retrying cannot help.
    #[error("reconstruction failed: {0}")]
    Reconstruction(String),

    /// Upload to every new node failed.
    #[error("repair upload failed: {0}")]
    Put(String),

    #[error("repair job deadline exceeded")]
    DeadlineExceeded,
}

impl RepairError {
    pub fn should_delete(&self) -> bool {
        matches!(
            self,
            RepairError::InvalidRepair(_) | RepairError::Reconstruction(_)
        )
    }
}
