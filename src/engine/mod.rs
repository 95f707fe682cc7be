//! Battle reconciliation.
//!
//! A room's [`BattleState`] is resumed from the store on every step. A seed
//! waits for the history document around the reported tick, then searches
//! backward until the battle stops being contiguous. After that each step
//! searches forward from the last checked boundary until the battle ends,
//! the stop horizon passes, or the newest document is not generated yet.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    constants::{align_to_history, HISTORY_INTERVAL},
    env::WorkerSettings,
    errors::{ReporterError, ReporterResult},
    metrics::{
        BATTLES_FINISHED_TOTAL, HISTORY_FETCH_ERRORS_TOTAL, PROCESSING_QUEUE_LENGTH,
        ROOMS_ABANDONED_TOTAL, ROOMS_DROPPED_MISSING_STATE_TOTAL,
    },
    model::{
        BattlePhase, BattleState, Direction, FinishedBattle, HistorySnapshot, ReconcilingState,
        SeedState, Tick,
    },
    pipeline::{DrainCursor, PipelineStore},
    screeps::{HistoryProvider, UserResolver},
};

pub mod merge;

pub use merge::{merge_snapshot, Usernames};

/// Result of one reconciliation step.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Needs more history later. `changed` says whether `state` must be saved.
    Pending { state: BattleState, changed: bool },
    Finished(FinishedBattle),
    /// The seed's history never appeared within the abandon horizon.
    Abandoned,
}

enum SeedStep {
    Waiting,
    Abandoned,
    Started(ReconcilingState),
}

pub struct Reconciler {
    history: Arc<dyn HistoryProvider>,
    users: Arc<dyn UserResolver>,
    abandon_horizon: u64,
}

impl Reconciler {
    pub fn new(
        history: Arc<dyn HistoryProvider>,
        users: Arc<dyn UserResolver>,
        abandon_horizon: u64,
    ) -> Self {
        Self {
            history,
            users,
            abandon_horizon,
        }
    }

    /// Advances `state` as far as the available history allows.
    ///
    /// An error fetching the seed document aborts the step and leaves the
    /// stored state untouched. Errors further back or forward end that search
    /// and keep whatever was found so far.
    pub async fn reconcile(
        &self,
        state: BattleState,
        current_tick: Tick,
    ) -> ReporterResult<ReconcileOutcome> {
        let BattleState { room, phase } = state;

        let (mut working, mut changed) = match phase {
            BattlePhase::Seed(seed) => match self.begin(&room, &seed, current_tick).await? {
                SeedStep::Started(working) => (working, true),
                SeedStep::Abandoned => return Ok(ReconcileOutcome::Abandoned),
                SeedStep::Waiting => {
                    return Ok(ReconcileOutcome::Pending {
                        state: BattleState {
                            room,
                            phase: BattlePhase::Seed(seed),
                        },
                        changed: false,
                    })
                }
            },
            BattlePhase::Reconciling(working) => (working, false),
        };

        let mut tick = working.max_tick_checked + HISTORY_INTERVAL;
        loop {
            let fetched = match self.fetch(&room, tick, &working).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    error!("Forward search for {} stopped at tick {}: {}", room, tick, e);
                    break;
                }
            };
            let Some((snapshot, usernames)) = fetched else {
                debug!("{}: history at {} not generated yet", room, tick);
                break;
            };

            let still_a_battle =
                merge_snapshot(&mut working, &snapshot, Direction::Latest, &usernames);
            working.max_tick_checked = tick;
            changed = true;

            if !still_a_battle {
                return Ok(ReconcileOutcome::Finished(
                    self.finalize(&room, working, false).await,
                ));
            }
            if tick > working.stop_checking_at {
                return Ok(ReconcileOutcome::Finished(
                    self.finalize(&room, working, true).await,
                ));
            }
            tick += HISTORY_INTERVAL;
        }

        Ok(ReconcileOutcome::Pending {
            state: BattleState {
                room,
                phase: BattlePhase::Reconciling(working),
            },
            changed,
        })
    }

    async fn begin(
        &self,
        room: &str,
        seed: &SeedState,
        current_tick: Tick,
    ) -> ReporterResult<SeedStep> {
        let aligned = align_to_history(seed.tick_to_check);
        let mut working = seed.begin(aligned);

        let Some((snapshot, usernames)) = self.fetch(room, aligned, &working).await? else {
            if aligned + self.abandon_horizon < current_tick {
                warn!(
                    "{}: history at {} unavailable for over {} ticks, abandoning",
                    room, aligned, self.abandon_horizon
                );
                return Ok(SeedStep::Abandoned);
            }
            debug!("{}: waiting for first history document at {}", room, aligned);
            return Ok(SeedStep::Waiting);
        };

        let mut still_a_battle =
            merge_snapshot(&mut working, &snapshot, Direction::Earliest, &usernames);
        let mut tick = aligned;
        while still_a_battle && tick >= HISTORY_INTERVAL {
            tick -= HISTORY_INTERVAL;
            match self.fetch(room, tick, &working).await {
                Ok(Some((snapshot, usernames))) => {
                    still_a_battle =
                        merge_snapshot(&mut working, &snapshot, Direction::Earliest, &usernames);
                }
                Ok(None) => {
                    debug!("{}: no history before {}", room, tick + HISTORY_INTERVAL);
                    break;
                }
                Err(e) => {
                    error!("Backward search for {} stopped at tick {}: {}", room, tick, e);
                    break;
                }
            }
        }

        info!(
            "{}: battle found, hostilities from {} to {}",
            room, working.earliest_hostility_tick, working.latest_hostility_tick
        );
        Ok(SeedStep::Started(working))
    }

    /// Fetches one document and resolves the usernames its merge will need.
    async fn fetch(
        &self,
        room: &str,
        tick: Tick,
        working: &ReconcilingState,
    ) -> ReporterResult<Option<(HistorySnapshot, Usernames)>> {
        let snapshot = match self.history.fetch_history(room, tick).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(None),
            Err(e) => {
                HISTORY_FETCH_ERRORS_TOTAL.inc();
                return Err(e);
            }
        };

        let mut usernames = Usernames::new();
        for user_id in snapshot.user_ids_to_resolve(&working.known_unit_ids) {
            let name = self.users.username(&user_id).await?;
            usernames.insert(user_id, name);
        }
        Ok(Some((snapshot, usernames)))
    }

    async fn finalize(
        &self,
        room: &str,
        working: ReconcilingState,
        battle_still_ongoing: bool,
    ) -> FinishedBattle {
        let mut alliances = BTreeMap::new();
        for player in working.player_unit_counts.keys() {
            let alliance = match self.users.alliance(player).await {
                Ok(alliance) => alliance,
                Err(e) => {
                    warn!("Alliance lookup for {} failed: {}", player, e);
                    None
                }
            };
            alliances.insert(player.clone(), alliance);
        }

        let finished = working.finish(room, battle_still_ongoing, alliances);
        info!(
            "{}: battle {} after {} ticks",
            room,
            if battle_still_ongoing { "still ongoing" } else { "ended" },
            finished.duration
        );
        finished
    }
}

/// What became of a room after one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomStep {
    Pending,
    Finished,
    Dropped,
}

/// Runs one reconciliation step for `room` and persists the result.
pub async fn process_room(
    store: &dyn PipelineStore,
    reconciler: &Reconciler,
    room: &str,
    current_tick: Tick,
) -> ReporterResult<RoomStep> {
    let Some(state) = store.load_state(room).await? else {
        error!("{}; dropping the room", ReporterError::missing_state(room));
        ROOMS_DROPPED_MISSING_STATE_TOTAL.inc();
        store.finish_processing(room, None).await?;
        return Ok(RoomStep::Dropped);
    };

    match reconciler.reconcile(state, current_tick).await? {
        ReconcileOutcome::Pending { state, changed } => {
            if changed {
                store.save_state(&state).await?;
            }
            Ok(RoomStep::Pending)
        }
        ReconcileOutcome::Finished(battle) => {
            let outcome = if battle.battle_still_ongoing {
                "ongoing"
            } else {
                "ended"
            };
            BATTLES_FINISHED_TOTAL.with_label_values(&[outcome]).inc();
            store.finish_processing(room, Some(&battle)).await?;
            Ok(RoomStep::Finished)
        }
        ReconcileOutcome::Abandoned => {
            ROOMS_ABANDONED_TOTAL.inc();
            store.finish_processing(room, None).await?;
            Ok(RoomStep::Dropped)
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStats {
    pub finished: usize,
    pub pending: usize,
    pub dropped: usize,
    pub failed: usize,
}

/// One pass over the processing queue. Rooms that stay pending or fail are
/// left queued for the next pass.
pub async fn process_pending_once(
    store: &dyn PipelineStore,
    reconciler: &Reconciler,
) -> ReporterResult<ProcessStats> {
    let current_tick = store.latest_tick().await?.unwrap_or(0);
    let queued = store.processing_len().await?;
    PROCESSING_QUEUE_LENGTH.set(queued as i64);

    let mut stats = ProcessStats::default();
    let mut cursor = DrainCursor::new(queued);
    while cursor.has_budget() {
        let Some(room) = store.next_to_process(false).await? else {
            break;
        };
        if !cursor.admit(&room) {
            break;
        }

        match process_room(store, reconciler, &room, current_tick).await {
            Ok(RoomStep::Finished) => stats.finished += 1,
            Ok(RoomStep::Dropped) => stats.dropped += 1,
            Ok(RoomStep::Pending) => {
                cursor.kept(&room);
                stats.pending += 1;
            }
            Err(e) => {
                error!("Failed to process room {}: {}", room, e);
                cursor.kept(&room);
                stats.failed += 1;
            }
        }
    }

    debug!("Processing pass done: {:?}", stats);
    Ok(stats)
}

/// Blocks on the processing queue until `shutdown` is cancelled. After a room
/// stays pending the worker pauses so a queue of waiting rooms is not spun.
pub async fn process_continuously(
    store: Arc<dyn PipelineStore>,
    reconciler: Arc<Reconciler>,
    worker: WorkerSettings,
    shutdown: CancellationToken,
) {
    let retry_pause = Duration::from_secs(worker.pending_retry_seconds);
    let error_pause = Duration::from_secs(worker.idle_poll_seconds);

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = store.next_to_process(true) => next,
        };
        let room = match next {
            Ok(Some(room)) => room,
            Ok(None) => continue,
            Err(e) => {
                error!("Failed to pull from processing queue: {}", e);
                if pause(&shutdown, error_pause).await {
                    break;
                }
                continue;
            }
        };

        let step = match store.latest_tick().await {
            Ok(current_tick) => {
                process_room(store.as_ref(), &reconciler, &room, current_tick.unwrap_or(0)).await
            }
            Err(e) => Err(e),
        };
        let should_pause = match step {
            Ok(RoomStep::Pending) => true,
            Ok(_) => false,
            Err(e) => {
                error!("Failed to process room {}: {}", room, e);
                true
            }
        };
        if should_pause && pause(&shutdown, retry_pause).await {
            break;
        }
    }
    info!("Processing worker stopped");
}

/// Sleeps for `duration`. Returns true if `shutdown` fired first.
pub(crate) async fn pause(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
