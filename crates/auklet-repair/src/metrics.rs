use prometheus::{GaugeVec, IntCounter, IntGauge, IntGaugeVec, Opts, Registry};

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let c = IntCounter::new(name.to_string(), help.to_string())?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let g = IntGauge::new(name.to_string(), help.to_string())?;
    registry.register(Box::new(g.clone()))?;
    Ok(g)
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntGaugeVec, prometheus::Error> {
    let v = IntGaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(v.clone()))?;
    Ok(v)
}

fn float_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<GaugeVec, prometheus::Error> {
    let v = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(v.clone()))?;
    Ok(v)
}

/// Counters published by the segment repairer and dispatcher.
#[derive(Clone)]
pub struct RepairMetrics {
    pub attempted: IntCounter,
    pub succeeded: IntCounter,
    pub failed: IntCounter,
    pub partial: IntCounter,
    pub unnecessary: IntCounter,
    pub segment_deleted_before_repair: IntCounter,
    pub segment_expired_before_repair: IntCounter,
    pub segment_modified: IntCounter,
    pub irreparable: IntCounter,
    pub download_shortfall: IntCounter,
}

impl RepairMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(RepairMetrics {
            attempted: counter(registry, "repair_attempted_total", "repair jobs started")?,
            succeeded: counter(registry, "repair_succeeded_total", "repairs fully committed")?,
            failed: counter(registry, "repair_failed_total", "repair jobs that errored")?,
            partial: counter(
                registry,
                "repair_partial_total",
                "repairs committed below the optimal target",
            )?,
            unnecessary: counter(
                registry,
                "repair_unnecessary_total",
                "segments selected but healthy enough",
            )?,
            segment_deleted_before_repair: counter(
                registry,
                "repair_segment_deleted_total",
                "segments deleted upstream before repair",
            )?,
            segment_expired_before_repair: counter(
                registry,
                "repair_segment_expired_total",
                "segments expired before repair",
            )?,
            segment_modified: counter(
                registry,
                "repair_segment_modified_total",
                "segments modified concurrently during repair",
            )?,
            irreparable: counter(
                registry,
                "repair_irreparable_total",
                "segments with fewer retrievable pieces than required",
            )?,
            download_shortfall: counter(
                registry,
                "repair_download_shortfall_total",
                "repairs aborted because too few pieces were fetched",
            )?,
        })
    }
}

/// Gauges published by the queue statistics chore.
#[derive(Clone)]
pub struct QueueMetrics {
    pub depth: IntGauge,
    pub age_of_stat_seconds: IntGauge,
    pub count: IntGaugeVec,
    pub since_oldest_inserted_seconds: IntGaugeVec,
    pub since_latest_inserted_seconds: IntGaugeVec,
    pub since_oldest_attempted_seconds: IntGaugeVec,
    pub since_latest_attempted_seconds: IntGaugeVec,
    pub min_segment_health: GaugeVec,
    pub max_segment_health: GaugeVec,
}

impl QueueMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        const LABELS: &[&str] = &["placement", "attempted"];
        Ok(QueueMetrics {
            depth: gauge(registry, "repair_queue_depth", "total queued segments")?,
            age_of_stat_seconds: gauge(
                registry,
                "repair_queue_age_of_stat_seconds",
                "age of the last successful stat refresh",
            )?,
            count: gauge_vec(registry, "repair_queue_count", "queued segments", LABELS)?,
            since_oldest_inserted_seconds: gauge_vec(
                registry,
                "repair_queue_since_oldest_inserted_sec",
                "seconds since the oldest insertion",
                LABELS,
            )?,
            since_latest_inserted_seconds: gauge_vec(
                registry,
                "repair_queue_since_latest_inserted_sec",
                "seconds since the newest insertion",
                LABELS,
            )?,
            since_oldest_attempted_seconds: gauge_vec(
                registry,
                "repair_queue_since_oldest_attempted_sec",
                "seconds since the oldest attempt",
                LABELS,
            )?,
            since_latest_attempted_seconds: gauge_vec(
                registry,
                "repair_queue_since_latest_attempted_sec",
                "seconds since the newest attempt",
                LABELS,
            )?,
            min_segment_health: float_gauge_vec(
                registry,
                "repair_queue_min_segment_health",
                "lowest health per group",
                LABELS,
            )?,
            max_segment_health: float_gauge_vec(
                registry,
                "repair_queue_max_segment_health",
                "highest health per group",
                LABELS,
            )?,
        })
    }
}

/// Counter for segments newly queued by the change-stream observer.
#[derive(Clone)]
pub struct ObserverMetrics {
    pub segments_queued: IntCounter,
    pub records_processed: IntCounter,
}

impl ObserverMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(ObserverMetrics {
            segments_queued: counter(
                registry,
                "checker_segments_queued_total",
                "injured segments freshly queued",
            )?,
            records_processed: counter(
                registry,
                "checker_records_processed_total",
                "data change records inspected",
            )?,
        })
    }
}
