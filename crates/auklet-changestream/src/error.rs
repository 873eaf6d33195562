use thiserror::Error;

use crate::partition::PartitionState;

#[derive(Debug, Error)]
pub enum PartitionStoreError {
    /// A watermark or state update matched zero rows. Fatal to the caller:
    /// it indicates a logic bug, not a transient condition.
    #[error("no such partition: {0:?}")]
    NoSuchPartition(String),

    #[error("invalid target state: {0}")]
    InvalidState(PartitionState),

    #[error("internal partition store error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("change stream cancelled")]
    Cancelled,

    #[error("change stream read failed: {0}")]
    Read(String),
}

impl StreamError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] PartitionStoreError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("record callback failed: {0}")]
    Callback(String),

    #[error("partition task panicked: {0}")]
    Panic(String),
}

impl ProcessError {
    /// Fatal errors tear down the whole processor; transient ones requeue
    /// the partition for retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProcessError::Store(_) | ProcessError::Panic(_))
    }
}
