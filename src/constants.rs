//! Fixed values of the history API and of the battle heuristics.

/// Room history is only recorded on 20-tick boundaries.
pub const HISTORY_INTERVAL: u64 = 20;

/// A gap of this many ticks without hostile actions ends a battle.
pub const PEACE_GAP: i64 = 50;

/// If a seed tick's history is still missing this many ticks later, the room is dropped.
pub const DEFAULT_ABANDON_HORIZON: u64 = 2000;

/// Forward search reports the battle as ongoing once it passes `seed + this`.
pub const DEFAULT_STOP_CHECKING_AFTER: u64 = 120;

/// Invader and source keeper user ids. Their creeps are never tallied.
pub const SYSTEM_USER_IDS: [&str; 2] = ["2", "3"];

// Redis key expiries (seconds)
pub const BATTLE_STATE_EXPIRE: usize = 60 * 60 * 24 * 3;
pub const LAST_BATTLE_END_EXPIRE: usize = 60 * 60 * 24 * 10;
pub const LATEST_TICK_EXPIRE: usize = 60 * 60;
pub const USERNAME_CACHE_EXPIRE: usize = 60 * 60 * 5;
pub const ALLIANCE_CACHE_EXPIRE: usize = 60 * 60 * 5;
pub const ALLIANCES_FETCHED_EXPIRE: usize = 60 * 60 * 4;

/// Rounds a tick down to the history boundary containing it.
pub fn align_to_history(tick: u64) -> u64 {
    tick - tick % HISTORY_INTERVAL
}
