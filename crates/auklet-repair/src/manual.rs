use tracing::{info, warn};

use auklet_queue::{CsvQueue, QueueError, RepairQueue};

use crate::repairer::SegmentRepairer;

/// Tally of one manual repair run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_rows: usize,
}

const MANUAL_BATCH_SIZE: usize = 10;

/// Alternate repair entry point for one-off operational repairs.
///
/// Drains a CSV-backed queue serially in small batches through a repairer
/// (construct it with [`NoopAudit`](crate::audit::NoopAudit): manual runs do
/// not feed reputation) and records each outcome to the queue's
/// `.success`/`.failed` sibling files. Terminates when the input is
/// exhausted.
pub async fn run_manual_repair(
    queue: &CsvQueue,
    repairer: &SegmentRepairer,
) -> Result<ManualSummary, QueueError> {
    let mut summary = ManualSummary {
        skipped_rows: queue.skipped(),
        ..ManualSummary::default()
    };

    loop {
        let batch = queue.select(MANUAL_BATCH_SIZE, &[], &[]).await?;
        if batch.is_empty() {
            break;
        }
        for segment in batch {
            summary.attempted += 1;
            let repaired = match repairer.repair(&segment).await {
                Ok(outcome) => {
                    info!(
                        stream_id = %segment.stream_id,
                        position = %segment.position,
                        reason = ?outcome.reason,
                        "manual repair finished"
                    );
                    outcome.should_delete
                }
                Err(err) => {
                    warn!(
                        stream_id = %segment.stream_id,
                        position = %segment.position,
                        error = %err,
                        "manual repair failed"
                    );
                    err.should_delete()
                }
            };
            if repaired {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            queue.release(&segment, repaired).await?;
        }
    }

    info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        failed = summary.failed,
        skipped_rows = summary.skipped_rows,
        "manual repair run complete"
    );
    Ok(summary)
}
