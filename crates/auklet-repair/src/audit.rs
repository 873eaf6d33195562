use async_trait::async_trait;
use tracing::debug;

use auklet_domain::{NodeId, Position, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceOutcomeKind {
    Success,
    Failed,
    Offline,
    Contained,
    Unknown,
}

/// One node's behavior during a repair download.
#[derive(Debug, Clone, Copy)]
pub struct PieceOutcome {
    pub number: u16,
    pub node: NodeId,
    pub outcome: PieceOutcomeKind,
}

/// Sink for per-piece download outcomes; feeds node reputation.
#[async_trait]
pub trait AuditReporter: Send + Sync + 'static {
    async fn report_pieces(
        &self,
        stream_id: StreamId,
        position: Position,
        outcomes: &[PieceOutcome],
    );
}

/// Discards all reports. The manual repair driver runs with this.
#[derive(Debug, Default, Clone)]
pub struct NoopAudit;

impl NoopAudit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditReporter for NoopAudit {
    async fn report_pieces(
        &self,
        _stream_id: StreamId,
        _position: Position,
        _outcomes: &[PieceOutcome],
    ) {
    }
}

/// Logs reports instead of feeding a reputation service; local runs.
#[derive(Debug, Default, Clone)]
pub struct TracingAudit;

impl TracingAudit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditReporter for TracingAudit {
    async fn report_pieces(
        &self,
        stream_id: StreamId,
        position: Position,
        outcomes: &[PieceOutcome],
    ) {
        let successes = outcomes
            .iter()
            .filter(|o| o.outcome == PieceOutcomeKind::Success)
            .count();
        debug!(
            %stream_id,
            %position,
            total = outcomes.len(),
            successes,
            "audit outcomes"
        );
    }
}
