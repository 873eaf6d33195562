use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use auklet_config::RepairConfig;
use auklet_domain::{NodeRecord, Piece, PlacementRules};
use auklet_metabase::{MetabaseError, SegmentStore, UpdateSegmentPieces};
use auklet_overlay::{NewNodeRequest, Overlay, OverlayError};

use crate::audit::AuditReporter;
use crate::buffer::RepairBuffer;
use crate::classify::{classify, ClassifyOptions, PieceSet, RepairDecision};
use crate::ec::{EcClient, EcError};
use crate::error::RepairError;
use crate::metrics::RepairMetrics;
use crate::orders::OrderService;

/// Why a repair attempt ended the way it did.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairReason {
    SegmentDeleted,
    SegmentExpired,
    SegmentModified,
    NotNeeded {
        dropped_forcing: usize,
    },
    Irreparable {
        retrievable: usize,
        required: usize,
        missing: usize,
        suspended: usize,
        clumped: usize,
        exiting: usize,
        out_of_placement: usize,
    },
    DownloadShortfall {
        required: usize,
        successful: usize,
        failed: usize,
        offline: usize,
        contained: usize,
        unknown: usize,
    },
    Repaired {
        uploaded: usize,
        healthy_before: usize,
        healthy_after: usize,
        partial: bool,
    },
}

/// Final result of one repair attempt. `should_delete` drives
/// `RepairQueue::release`: true removes the entry, false leaves it queued
/// for retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairOutcome {
    pub should_delete: bool,
    pub reason: RepairReason,
}

impl RepairOutcome {
    fn delete(reason: RepairReason) -> Self {
        RepairOutcome { should_delete: true, reason }
    }

    fn retry(reason: RepairReason) -> Self {
        RepairOutcome { should_delete: false, reason }
    }
}

/// Downloads enough surviving pieces of one segment to reconstruct it and
/// uploads replacement pieces to fresh nodes.
pub struct SegmentRepairer {
    metabase: Arc<dyn SegmentStore>,
    /// Resolves the nodes already holding pieces; wrapped in the
    /// participating-node cache.
    participating_overlay: Arc<dyn Overlay>,
    /// Selects fresh upload targets; wrapped in the repair-selection cache.
    overlay: Arc<dyn Overlay>,
    orders: Arc<dyn OrderService>,
    ec: Arc<dyn EcClient>,
    audit: Arc<dyn AuditReporter>,
    placements: PlacementRules,
    config: RepairConfig,
    excluded_countries: BTreeSet<String>,
    metrics: RepairMetrics,
}

impl SegmentRepairer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metabase: Arc<dyn SegmentStore>,
        participating_overlay: Arc<dyn Overlay>,
        overlay: Arc<dyn Overlay>,
        orders: Arc<dyn OrderService>,
        ec: Arc<dyn EcClient>,
        audit: Arc<dyn AuditReporter>,
        placements: PlacementRules,
        config: RepairConfig,
        metrics: RepairMetrics,
    ) -> Self {
        let excluded_countries = config.excluded_country_codes.iter().cloned().collect();
        SegmentRepairer {
            metabase,
            participating_overlay,
            overlay,
            orders,
            ec,
            audit,
            placements,
            config,
            excluded_countries,
            metrics,
        }
    }

    /// Attempt to repair one queued segment.
    pub async fn repair(
        &self,
        queued: &auklet_domain::InjuredSegment,
    ) -> Result<RepairOutcome, RepairError> {
        self.metrics.attempted.inc();
        let stream_id = queued.stream_id;
        let position = queued.position;

        // 1. Fetch metadata. Missing means it was deleted upstream.
        let segment = match self
            .metabase
            .get_segment_for_repair(stream_id, position)
            .await
        {
            Ok(Some(segment)) => segment,
            Ok(None) => {
                info!(%stream_id, %position, "segment_deleted_before_repair");
                self.metrics.segment_deleted_before_repair.inc();
                return Ok(RepairOutcome::delete(RepairReason::SegmentDeleted));
            }
            Err(e) => return Err(RepairError::MetadataGet(e.to_string())),
        };

        // 2. Expiry check.
        let now = Utc::now();
        if segment.is_expired(now) {
            info!(%stream_id, %position, "segment_expired_before_repair");
            self.metrics.segment_expired_before_repair.inc();
            return Ok(RepairOutcome::delete(RepairReason::SegmentExpired));
        }
        if segment.is_inline() {
            return Err(RepairError::InvalidRepair(
                "inline segment in repair queue".into(),
            ));
        }
        segment
            .redundancy
            .validate()
            .map_err(|e| RepairError::InvalidRepair(e.to_string()))?;
        segment
            .validate_pieces()
            .map_err(|e| RepairError::InvalidRepair(e.to_string()))?;
        let scheme = segment.redundancy;

        // 3. Resolve participating nodes through the refresh cache.
        let nodes = self
            .participating_overlay
            .get_nodes(&segment.piece_nodes())
            .await
            .map_err(|e| RepairError::OverlayQuery(e.to_string()))?;

        // 4. Classify.
        let rule = self.placements.for_placement(segment.placement);
        let options = ClassifyOptions {
            now,
            online_window: self.config.online_window(),
            do_declumping: self.config.do_declumping,
            do_placement_check: self.config.do_placement_check,
            excluded_countries: self.excluded_countries.clone(),
        };
        let check = classify(&segment.pieces, &nodes, rule, &options);
        let healthy_before = check.healthy.len();

        match check.decide(&scheme) {
            RepairDecision::Irreparable => {
                warn!(
                    %stream_id,
                    %position,
                    pieces_retrievable = check.retrievable.len(),
                    pieces_required = scheme.required,
                    pieces_missing = check.missing.len(),
                    pieces_suspended = check.suspended.len(),
                    pieces_clumped = check.clumped.len(),
                    pieces_out_of_placement = check.out_of_placement.len(),
                    "irreparable_segment"
                );
                self.metrics.irreparable.inc();
                // Left in the queue: nodes may return online.
                return Ok(RepairOutcome::retry(RepairReason::Irreparable {
                    retrievable: check.retrievable.len(),
                    required: scheme.required as usize,
                    missing: check.missing.len(),
                    suspended: check.suspended.len(),
                    clumped: check.clumped.len(),
                    exiting: check.exiting.len(),
                    out_of_placement: check.out_of_placement.len(),
                }));
            }
            RepairDecision::NotNeeded => {
                self.metrics.unnecessary.inc();
                let dropped = check.forcing_repair.len();
                if dropped > 0 {
                    // Shed forcing pieces with a no-reconstruction update.
                    let new_pieces: Vec<Piece> = segment
                        .pieces
                        .iter()
                        .filter(|p| !check.forcing_repair.contains(p.number))
                        .copied()
                        .collect();
                    match self
                        .metabase
                        .update_segment_pieces(UpdateSegmentPieces {
                            stream_id,
                            position,
                            old_pieces: segment.pieces.clone(),
                            new_redundancy: scheme,
                            new_pieces,
                            new_repaired_at: now,
                        })
                        .await
                    {
                        Ok(()) => {}
                        Err(MetabaseError::Altered) => {
                            self.metrics.segment_modified.inc();
                            return Ok(RepairOutcome::delete(RepairReason::SegmentModified));
                        }
                        Err(MetabaseError::SegmentNotFound) => {
                            return Ok(RepairOutcome::delete(RepairReason::SegmentDeleted));
                        }
                        Err(e) => return Err(RepairError::MetadataPut(e.to_string())),
                    }
                }
                info!(%stream_id, %position, dropped_forcing = dropped, "repair_unnecessary");
                return Ok(RepairOutcome::delete(RepairReason::NotNeeded {
                    dropped_forcing: dropped,
                }));
            }
            RepairDecision::Repair => {}
        }

        // 5. GET order limits. A piece whose limit creation failed silently
        // moves from retrievable to missing.
        let get_limits = self
            .orders
            .create_get_order_limits(&segment, &nodes, &check.retrievable)
            .await
            .map_err(|e| RepairError::OrderLimit(e.to_string()))?;
        let granted = get_limits.granted();
        if granted.len() < scheme.required as usize {
            warn!(
                %stream_id,
                %position,
                granted = granted.len(),
                required = scheme.required,
                "irreparable_segment"
            );
            self.metrics.irreparable.inc();
            return Ok(RepairOutcome::retry(RepairReason::Irreparable {
                retrievable: granted.len(),
                required: scheme.required as usize,
                missing: check.missing.len(),
                suspended: check.suspended.len(),
                clumped: check.clumped.len(),
                exiting: check.exiting.len(),
                out_of_placement: check.out_of_placement.len(),
            }));
        }

        // 6. Target counts.
        let target = ((scheme.optimal as f64) * self.config.excess_multiplier()).ceil() as usize;
        let request_count = target.min(scheme.total as usize).saturating_sub(healthy_before);
        let min_successful = (scheme.optimal as usize).saturating_sub(healthy_before);

        // 7. Fresh upload targets, never on already-participating nodes.
        let new_nodes = self
            .overlay
            .select_new_nodes(
                request_count,
                &NewNodeRequest {
                    excluded: segment.piece_nodes(),
                    placement: segment.placement,
                },
            )
            .await
            .map_err(|e| match e {
                OverlayError::NotEnoughNodes { .. } => RepairError::NotEnoughNodes(e.to_string()),
                other => RepairError::OverlayQuery(other.to_string()),
            })?;

        // 8. Download and reconstruct into the spill buffer.
        let mut buffer = RepairBuffer::new(self.config.in_memory_repair)
            .map_err(|e| RepairError::Download(e.to_string()))?;
        let download = match self
            .ec
            .get(
                &get_limits,
                &scheme,
                segment.encrypted_size,
                &mut buffer,
                self.config.dial_timeout(),
                self.config.download_timeout(),
                self.config.download_long_tail,
            )
            .await
        {
            Ok(download) => download,
            Err(EcError::DownloadShortfall {
                required,
                successful,
                failed,
                offline,
                contained,
                unknown,
            }) => {
                warn!(
                    %stream_id,
                    %position,
                    required,
                    successful,
                    failed,
                    offline,
                    contained,
                    unknown,
                    "irretrievable_segment"
                );
                self.metrics.download_shortfall.inc();
                // Not an error: the queue retries after the attempt interval.
                return Ok(RepairOutcome::retry(RepairReason::DownloadShortfall {
                    required,
                    successful,
                    failed,
                    offline,
                    contained,
                    unknown,
                }));
            }
            Err(EcError::Reconstruct(message)) => {
                return Err(RepairError::Reconstruction(message));
            }
            Err(e) => return Err(RepairError::Download(e.to_string())),
        };

        // A concurrent piece-set change means our downloaded view is stale;
        // drop the attempt and let the new state speak for itself.
        match self
            .metabase
            .pieces_altered(stream_id, position, &segment.pieces)
            .await
        {
            Ok(false) => {}
            Ok(true) => {
                self.metrics.segment_modified.inc();
                return Ok(RepairOutcome::delete(RepairReason::SegmentModified));
            }
            Err(MetabaseError::SegmentNotFound) => {
                self.metrics.segment_deleted_before_repair.inc();
                return Ok(RepairOutcome::delete(RepairReason::SegmentDeleted));
            }
            Err(e) => return Err(RepairError::MetadataGet(e.to_string())),
        }

        // 10. Audit reporting.
        if self.config.reputation_update_enabled {
            self.audit
                .report_pieces(stream_id, position, &download.outcomes)
                .await;
        }

        // 11. Assign fresh nodes to reusable piece numbers, then PUT limits.
        // Numbers held by healthy pieces or retained excluded-country pieces
        // are reserved; hash-failed pieces lose theirs.
        let keep_excluded = check.retrievable.intersection(&check.in_excluded_country);
        let reserved = check
            .healthy
            .union(&keep_excluded)
            .difference(&download.failed_verification);
        let targets: Vec<(u16, NodeRecord)> = (0..scheme.total)
            .filter(|number| !reserved.contains(*number))
            .zip(new_nodes)
            .collect();
        let put_limits = self
            .orders
            .create_put_order_limits(&segment, &targets)
            .await
            .map_err(|e| RepairError::OrderLimit(e.to_string()))?;

        // 12. Upload phase, bounded separately from the download.
        let uploaded = match self
            .ec
            .repair(
                &put_limits,
                &scheme,
                &mut buffer,
                self.config.upload_timeout(),
                min_successful,
            )
            .await
        {
            Ok(uploaded) => uploaded,
            Err(e) => return Err(RepairError::Put(e.to_string())),
        };

        // 13. Final piece set.
        let uploaded_numbers: PieceSet = uploaded.iter().map(|u| u.number).collect();
        let healthy_after =
            check.healthy.difference(&download.failed_verification).len() + uploaded.len();

        let mut to_drop = download.failed_verification.clone();
        if healthy_after >= scheme.optimal as usize {
            // Excluded-country pieces that are still retrievable keep their
            // piece until they lose it naturally.
            to_drop = to_drop.union(&check.unhealthy.difference(&keep_excluded));
        } else if healthy_after > scheme.repair as usize {
            to_drop = to_drop.union(&check.out_of_placement);
        }

        let mut new_pieces: Vec<Piece> = segment
            .pieces
            .iter()
            .filter(|p| !to_drop.contains(p.number) && !uploaded_numbers.contains(p.number))
            .copied()
            .collect();
        new_pieces.extend(uploaded.iter().map(|u| Piece { number: u.number, node: u.node }));
        new_pieces.sort_by_key(|p| p.number);

        // 14. Compare-and-swap the metadata; a lost race means the segment
        // changed under us and the attempt is discarded.
        match self
            .metabase
            .update_segment_pieces(UpdateSegmentPieces {
                stream_id,
                position,
                old_pieces: segment.pieces.clone(),
                new_redundancy: scheme,
                new_pieces,
                new_repaired_at: Utc::now(),
            })
            .await
        {
            Ok(()) => {}
            Err(MetabaseError::Altered) => {
                self.metrics.segment_modified.inc();
                return Ok(RepairOutcome::delete(RepairReason::SegmentModified));
            }
            Err(MetabaseError::SegmentNotFound) => {
                self.metrics.segment_deleted_before_repair.inc();
                return Ok(RepairOutcome::delete(RepairReason::SegmentDeleted));
            }
            Err(e) => return Err(RepairError::MetadataPut(e.to_string())),
        }

        let partial = uploaded.len() < min_successful;
        if partial {
            self.metrics.partial.inc();
        } else {
            self.metrics.succeeded.inc();
        }
        info!(
            %stream_id,
            %position,
            healthy_before,
            healthy_after,
            uploaded = uploaded.len(),
            partial,
            "segment_repaired"
        );
        Ok(RepairOutcome::delete(RepairReason::Repaired {
            uploaded: uploaded.len(),
            healthy_before,
            healthy_after,
            partial,
        }))
    }
}
