use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use prometheus::Registry;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use auklet_changestream::{
    MemoryChangeSource, MemoryPartitionStore, PartitionProcessor, PartitionStore,
    PostgresPartitionStore, GENESIS_TOKEN,
};
use auklet_config::Config;
use auklet_domain::PlacementRules;
use auklet_metabase::MemorySegmentStore;
use auklet_overlay::{MemoryOverlay, NodeCache, Overlay};
use auklet_queue::{CsvQueue, MemoryQueue, PostgresQueue, RepairQueue};
use auklet_repair::{
    run_manual_repair, LocalEcClient, LocalOrderService, NoopAudit, ObserverMetrics,
    QueueMetrics, QueueStatsChore, RepairDispatcher, RepairMetrics, SegmentHealthObserver,
    SegmentRepairer, TracingAudit,
};

use crate::cli::StoreArg;
use crate::output;

const OBSERVER_BATCH_SIZE: usize = 100;

fn load_config(path: &PathBuf) -> Result<Config> {
    auklet_config::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))
}

async fn open_backends(
    store: StoreArg,
    db_url: Option<String>,
    config: &Config,
) -> Result<(Arc<dyn RepairQueue>, Arc<dyn PartitionStore>)> {
    match store {
        StoreArg::Memory => {
            info!("using in-memory backends — state is lost on exit");
            Ok((
                Arc::new(MemoryQueue::new(config.queue.attempt_interval())),
                Arc::new(MemoryPartitionStore::new()),
            ))
        }
        StoreArg::Postgres => {
            let url = db_url
                .context("--db-url (or AUKLET_DATABASE_URL) is required for the postgres store")?;
            let queue = PostgresQueue::connect(&url, config.queue.attempt_interval())
                .await
                .context("failed to connect the repair queue")?;
            let partitions = PostgresPartitionStore::connect(&url)
                .await
                .context("failed to connect the partition store")?;
            Ok((Arc::new(queue), Arc::new(partitions)))
        }
    }
}

/// Wire and run the full repair process until ctrl-c.
///
/// Storage-node transport, order signing and node selection are behind
/// traits; this binary registers the local stubs, the same way production
/// deployments register their real implementations.
pub async fn run(config_path: PathBuf, store: StoreArg, db_url: Option<String>) -> Result<()> {
    let config = load_config(&config_path)?;
    let registry = Registry::new();
    let repair_metrics = RepairMetrics::new(&registry)?;
    let queue_metrics = QueueMetrics::new(&registry)?;
    let observer_metrics = ObserverMetrics::new(&registry)?;

    let (queue, partition_store) = open_backends(store, db_url, &config).await?;

    // Two caches over one directory: participating-node resolution and
    // fresh-node selection are tuned (or disabled) independently.
    let base_overlay: Arc<dyn Overlay> = Arc::new(MemoryOverlay::new());
    let participating = &config.repair.participating_node_cache;
    let participating_overlay: Arc<dyn Overlay> = Arc::new(NodeCache::new(
        base_overlay.clone(),
        participating.enabled,
        participating.interval(),
        participating.stale(),
    ));
    let selection = &config.repair.nodes_for_repair_cache;
    let selection_overlay: Arc<dyn Overlay> = Arc::new(NodeCache::new(
        base_overlay,
        selection.enabled,
        selection.interval(),
        selection.stale(),
    ));

    let repairer = Arc::new(SegmentRepairer::new(
        Arc::new(MemorySegmentStore::new()),
        participating_overlay,
        selection_overlay,
        Arc::new(LocalOrderService::new()),
        Arc::new(LocalEcClient::new()),
        Arc::new(TracingAudit::new()),
        PlacementRules::new(),
        config.repair.clone(),
        repair_metrics.clone(),
    ));
    let dispatcher = RepairDispatcher::new(
        queue.clone(),
        repairer,
        config.repair.clone(),
        repair_metrics,
    );
    let stats_chore = QueueStatsChore::new(queue.clone(), config.stats.clone(), queue_metrics);

    let observer = Arc::new(Mutex::new(SegmentHealthObserver::new(
        queue.clone(),
        OBSERVER_BATCH_SIZE,
        observer_metrics,
    )));
    let source = Arc::new(MemoryChangeSource::new());
    source.set_script(GENESIS_TOKEN, Vec::new());
    let processor = PartitionProcessor::new(
        partition_store,
        source,
        config.changestream.feed.clone(),
        config.changestream.heartbeat_interval(),
        SegmentHealthObserver::record_fn(observer),
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            cancel.cancel();
        });
    }

    info!(feed = %config.changestream.feed, "repair process starting");
    let start_from = config.changestream.start_from.unwrap_or_else(Utc::now);
    let checker = async {
        let result = processor.run(&cancel, start_from).await;
        if result.is_ok() && !cancel.is_cancelled() {
            // A completed pass re-reported every still-unhealthy segment, so
            // entries untouched for the whole window are healthy again.
            let cutoff =
                Utc::now() - chrono::Duration::days(config.queue.clean_before_days as i64);
            match queue.clean(cutoff).await {
                Ok(deleted) => info!(deleted, "purged stale queue entries"),
                Err(e) => tracing::warn!(error = %e, "queue clean failed"),
            }
        }
        result
    };
    let (processor_result, (), ()) = tokio::join!(
        checker,
        dispatcher.run(&cancel),
        stats_chore.run(&cancel),
    );
    processor_result.context("partition processor failed")?;
    info!("repair process stopped");
    Ok(())
}

/// One-shot repair of the segments listed in `input`.
pub async fn manual_repair(config_path: PathBuf, input: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    let registry = Registry::new();
    let repair_metrics = RepairMetrics::new(&registry)?;

    let queue = CsvQueue::open(&input)
        .with_context(|| format!("failed to open {}", input.display()))?;

    // Manual runs skip audit reporting entirely and query the overlay
    // directly, with no caching.
    let overlay: Arc<dyn Overlay> = Arc::new(MemoryOverlay::new());
    let repairer = SegmentRepairer::new(
        Arc::new(MemorySegmentStore::new()),
        overlay.clone(),
        overlay,
        Arc::new(LocalOrderService::new()),
        Arc::new(LocalEcClient::new()),
        Arc::new(NoopAudit::new()),
        PlacementRules::new(),
        config.repair.clone(),
        repair_metrics,
    );

    let summary = run_manual_repair(&queue, &repairer).await?;
    output::print_summary(&input, &summary);
    Ok(())
}

pub async fn queue_stat(db_url: Option<String>) -> Result<()> {
    let url = db_url.context("--db-url (or AUKLET_DATABASE_URL) is required")?;
    let queue = PostgresQueue::connect(&url, std::time::Duration::from_secs(6 * 60 * 60)).await?;
    let stats = queue.stat().await?;
    output::print_stats(&stats);
    Ok(())
}

pub async fn queue_count(db_url: Option<String>) -> Result<()> {
    let url = db_url.context("--db-url (or AUKLET_DATABASE_URL) is required")?;
    let queue = PostgresQueue::connect(&url, std::time::Duration::from_secs(6 * 60 * 60)).await?;
    println!("{}", queue.count().await?);
    Ok(())
}
