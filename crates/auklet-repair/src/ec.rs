use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use auklet_domain::{NodeId, RedundancyScheme};

use crate::audit::{PieceOutcome, PieceOutcomeKind};
use crate::buffer::RepairBuffer;
use crate::classify::PieceSet;
use crate::orders::OrderBatch;

#[derive(Debug, Error)]
pub enum EcError {
    /// Fewer than `required` pieces could be fetched. Carries the per-class
    /// counts for the irretrievable-segment event.
    #[error(
        "download shortfall: needed {required}, got {successful} \
         (failed {failed}, offline {offline}, contained {contained}, unknown {unknown})"
    )]
    DownloadShortfall {
        required: usize,
        successful: usize,
        failed: usize,
        offline: usize,
        contained: usize,
        unknown: usize,
    },

    /// Decode failed despite sufficient pieces: data corruption.
    #[error("erasure decode failed: {0}")]
    Reconstruct(String),

    /// Upload failed to every target node.
    #[error("upload failed to all nodes: {0}")]
    Put(String),

    #[error("ec transport error: {0}")]
    Transport(String),
}

/// Outcome of the download phase. The decoded segment itself lands in the
/// caller-supplied [`RepairBuffer`].
#[derive(Debug, Clone, Default)]
pub struct DownloadResult {
    /// Per-piece fetch outcomes, reported to the audit subsystem.
    pub outcomes: Vec<PieceOutcome>,
    /// Pieces whose content failed hash verification during download;
    /// always dropped from the segment.
    pub failed_verification: PieceSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadedPiece {
    pub number: u16,
    pub node: NodeId,
}

/// Black-box `(k, n)` erasure-coding client. Piece hashes and order-limit
/// signatures are verified on every response inside the implementation.
#[async_trait]
pub trait EcClient: Send + Sync + 'static {
    /// Fetch enough pieces via the GET limits to reconstruct the segment and
    /// decode it into `buffer`. `dial_timeout` bounds each peer dial,
    /// `download_timeout` bounds each piece fetch, and `long_tail` extra
    /// downloads run beyond the minimum needed so slow peers cannot stall
    /// the decode. Writing into the buffer (rather than streaming into the
    /// upload) keeps download backpressure away from upload deadlines.
    async fn get(
        &self,
        limits: &OrderBatch,
        scheme: &RedundancyScheme,
        segment_size: i64,
        buffer: &mut RepairBuffer,
        dial_timeout: Duration,
        download_timeout: Duration,
        long_tail: usize,
    ) -> Result<DownloadResult, EcError>;

    /// Re-encode from `buffer` and upload to every `Some` slot in `limits`.
    /// Returns the successfully uploaded pieces; short results are partial
    /// successes, not errors. `Err(Put)` means no upload succeeded.
    async fn repair(
        &self,
        limits: &OrderBatch,
        scheme: &RedundancyScheme,
        buffer: &mut RepairBuffer,
        timeout: Duration,
        successful_needed: usize,
    ) -> Result<Vec<UploadedPiece>, EcError>;
}

/// Stub erasure-coding client: downloads produce zero-filled segments and
/// uploads succeed on every target.
///
/// Performs no network I/O; used by tests and local runs. The production
/// implementation dials storage nodes over the piece transport.
#[derive(Debug, Default, Clone)]
pub struct LocalEcClient;

impl LocalEcClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EcClient for LocalEcClient {
    async fn get(
        &self,
        limits: &OrderBatch,
        scheme: &RedundancyScheme,
        segment_size: i64,
        buffer: &mut RepairBuffer,
        _dial_timeout: Duration,
        _download_timeout: Duration,
        _long_tail: usize,
    ) -> Result<DownloadResult, EcError> {
        let granted = limits.granted_count();
        if granted < scheme.required as usize {
            return Err(EcError::DownloadShortfall {
                required: scheme.required as usize,
                successful: granted,
                failed: 0,
                offline: 0,
                contained: 0,
                unknown: 0,
            });
        }

        buffer
            .write_all(&vec![0u8; segment_size.max(0) as usize])
            .map_err(|e| EcError::Transport(e.to_string()))?;

        let outcomes = limits
            .limits
            .iter()
            .flatten()
            .map(|slot| PieceOutcome {
                number: slot.limit.piece_number,
                node: slot.limit.node,
                outcome: PieceOutcomeKind::Success,
            })
            .collect();
        debug!(granted, "LocalEcClient: get");
        Ok(DownloadResult { outcomes, failed_verification: PieceSet::new() })
    }

    async fn repair(
        &self,
        limits: &OrderBatch,
        _scheme: &RedundancyScheme,
        _buffer: &mut RepairBuffer,
        _timeout: Duration,
        _successful_needed: usize,
    ) -> Result<Vec<UploadedPiece>, EcError> {
        Ok(limits
            .limits
            .iter()
            .flatten()
            .map(|slot| UploadedPiece {
                number: slot.limit.piece_number,
                node: slot.limit.node,
            })
            .collect())
    }
}
