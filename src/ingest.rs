use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    engine::pause,
    env::{ScreepsSettings, WorkerSettings},
    errors::ReporterResult,
    metrics::{DUPLICATE_ENQUEUE_TOTAL, ROOMS_ENQUEUED_TOTAL, ROOMS_SKIPPED_ALREADY_REPORTED_TOTAL},
    model::BattleState,
    pipeline::PipelineStore,
    screeps::{BattleFeed, FeedQuery},
};

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Feed lookback used when no cursor tick is stored.
    pub lookback_interval: u64,
    pub stop_checking_after: u64,
}

impl IngestOptions {
    pub fn from_settings(screeps: &ScreepsSettings, worker: &WorkerSettings) -> Self {
        Self {
            lookback_interval: screeps.battles_lookback_interval,
            stop_checking_after: worker.stop_checking_after_ticks,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub enqueued: usize,
    pub already_queued: usize,
    pub already_reported: usize,
}

/// Polls the battle feed once and queues every room with new hostilities.
///
/// The feed cursor is only advanced after all rooms were queued, so a crash
/// part way through re-reads the same rooms and enqueue dedup absorbs them.
pub async fn ingest_once(
    store: &dyn PipelineStore,
    feed: &dyn BattleFeed,
    options: IngestOptions,
) -> ReporterResult<IngestStats> {
    let query = match store.latest_tick().await? {
        Some(tick) => FeedQuery::Since(tick),
        None => FeedQuery::Interval(options.lookback_interval),
    };
    let summary = feed.battles(query).await?;
    debug!("Battle feed ({:?}): {} rooms", query, summary.rooms.len());

    let mut stats = IngestStats::default();
    for battle in &summary.rooms {
        if let Some(end) = store.last_battle_end(&battle.room).await? {
            if battle.last_pvp_tick <= end {
                ROOMS_SKIPPED_ALREADY_REPORTED_TOTAL.inc();
                stats.already_reported += 1;
                continue;
            }
        }

        let seed = BattleState::seed(
            battle.room.as_str(),
            battle.last_pvp_tick,
            options.stop_checking_after,
        );
        if store.enqueue_processing(&battle.room, &seed).await? {
            ROOMS_ENQUEUED_TOTAL.inc();
            stats.enqueued += 1;
        } else {
            DUPLICATE_ENQUEUE_TOTAL.inc();
            stats.already_queued += 1;
        }
    }

    store.set_latest_tick(summary.time).await?;
    info!(
        "Ingested battle feed up to tick {}: {} new, {} already queued, {} already reported",
        summary.time, stats.enqueued, stats.already_queued, stats.already_reported
    );
    Ok(stats)
}

/// Polls the feed every `ingest_interval_seconds` until `shutdown` fires.
pub async fn ingest_continuously(
    store: Arc<dyn PipelineStore>,
    feed: Arc<dyn BattleFeed>,
    options: IngestOptions,
    worker: WorkerSettings,
    shutdown: CancellationToken,
) {
    let interval = Duration::from_secs(worker.ingest_interval_seconds);
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = ingest_once(store.as_ref(), feed.as_ref(), options) => result,
        };
        if let Err(e) = result {
            error!("Battle feed ingestion failed: {}", e);
        }
        if pause(&shutdown, interval).await {
            break;
        }
    }
    info!("Ingestion worker stopped");
}
