use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use auklet_config::RepairConfig;
use auklet_domain::InjuredSegment;
use auklet_queue::RepairQueue;

use crate::metrics::RepairMetrics;
use crate::repairer::SegmentRepairer;

/// Bounded worker pool over the repair queue.
///
/// Each cycle selects a batch and spawns one job per segment, holding one of
/// `max_repair` semaphore permits. The per-job deadline is captured before
/// the queue fetch: the `attempted_at` stamp is written at select time, and
/// the job must release the segment before that stamp expires or another
/// dispatcher could claim it. Shutdown waits for all in-flight jobs.
pub struct RepairDispatcher {
    queue: Arc<dyn RepairQueue>,
    repairer: Arc<SegmentRepairer>,
    config: RepairConfig,
    semaphore: Arc<Semaphore>,
    metrics: RepairMetrics,
}

impl RepairDispatcher {
    pub fn new(
        queue: Arc<dyn RepairQueue>,
        repairer: Arc<SegmentRepairer>,
        config: RepairConfig,
        metrics: RepairMetrics,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_repair));
        RepairDispatcher { queue, repairer, config, semaphore, metrics }
    }

    /// Cycle until cancelled, then drain in-flight jobs.
    pub async fn run(&self, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.cycle(cancel).await,
            }
        }

        // Semaphore drain: every job returns its permit when done.
        let _ = self
            .semaphore
            .acquire_many(self.config.max_repair as u32)
            .await;
        info!("repair dispatcher drained");
    }

    async fn cycle(&self, cancel: &CancellationToken) {
        // The job deadline includes the queue-fetch latency below.
        let deadline = Instant::now() + self.config.total_timeout();

        let segments = match self
            .queue
            .select(
                self.config.segments_select_batch_size,
                &self.config.included_placements,
                &self.config.excluded_placements,
            )
            .await
        {
            Ok(segments) => segments,
            Err(e) => {
                warn!(error = %e, "repair queue select failed");
                return;
            }
        };
        if segments.is_empty() {
            debug!("repair queue empty");
            return;
        }

        for segment in segments {
            let permit = tokio::select! {
                _ = cancel.cancelled() => {
                    // Unstarted work goes straight back to the queue.
                    if let Err(e) = self.queue.release(&segment, false).await {
                        warn!(error = %e, "failed to requeue segment on shutdown");
                    }
                    continue;
                }
                permit = self.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let queue = self.queue.clone();
            let repairer = self.repairer.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                let _permit = permit;
                process_one(&*queue, &repairer, &metrics, segment, deadline).await;
            });
        }
    }
}

async fn process_one(
    queue: &dyn RepairQueue,
    repairer: &SegmentRepairer,
    metrics: &RepairMetrics,
    segment: InjuredSegment,
    deadline: Instant,
) {
    let stream_id = segment.stream_id;
    let position = segment.position;

    let should_delete = match timeout_at(deadline, repairer.repair(&segment)).await {
        Ok(Ok(outcome)) => {
            debug!(%stream_id, %position, reason = ?outcome.reason, "repair job finished");
            outcome.should_delete
        }
        Ok(Err(err)) => {
            metrics.failed.inc();
            warn!(%stream_id, %position, error = %err, "repair job failed");
            err.should_delete()
        }
        Err(_) => {
            metrics.failed.inc();
            warn!(%stream_id, %position, "repair job deadline exceeded");
            false
        }
    };

    // Release errors never unwind the dispatch loop.
    if let Err(e) = queue.release(&segment, should_delete).await {
        warn!(%stream_id, %position, error = %e, "queue release failed");
    }
}
