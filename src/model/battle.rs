use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::history::Tick;
use super::unit::UnitClass;
use crate::constants::align_to_history;

/// Per-player creep tallies, keyed by username then role.
pub type UnitCounts = BTreeMap<String, BTreeMap<UnitClass, u32>>;

/// Which edge of the hostility window a snapshot is being merged against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Earliest,
    Latest,
}

/// Persisted working state of one room between pipeline steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BattleState {
    pub room: String,
    pub phase: BattlePhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum BattlePhase {
    /// Freshly reported, no history found yet.
    Seed(SeedState),
    Reconciling(ReconcilingState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedState {
    pub tick_to_check: Tick,
    pub stop_checking_at: Tick,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilingState {
    /// Highest history boundary incorporated so far.
    pub max_tick_checked: Tick,
    pub player_unit_counts: UnitCounts,
    pub known_unit_ids: BTreeSet<String>,
    pub owner: Option<String>,
    pub rcl: u32,
    pub earliest_hostility_tick: Tick,
    pub latest_hostility_tick: Tick,
    /// Never set; kept so stored documents stay compatible.
    #[serde(default)]
    pub earliest_hostility_collided: bool,
    pub stop_checking_at: Tick,
}

impl BattleState {
    /// Seed for a room whose last reported hostile tick is `pvp_tick`.
    pub fn seed(room: impl Into<String>, pvp_tick: Tick, stop_checking_after: u64) -> Self {
        Self {
            room: room.into(),
            phase: BattlePhase::Seed(SeedState {
                tick_to_check: pvp_tick,
                stop_checking_at: align_to_history(pvp_tick) + stop_checking_after,
            }),
        }
    }
}

impl SeedState {
    /// First working set once the seed tick's history exists. Both window
    /// edges start on the reported tick: the battle feed says it was hostile.
    pub fn begin(&self, first_history_tick: Tick) -> ReconcilingState {
        ReconcilingState {
            max_tick_checked: first_history_tick,
            player_unit_counts: UnitCounts::new(),
            known_unit_ids: BTreeSet::new(),
            owner: None,
            rcl: 0,
            earliest_hostility_tick: self.tick_to_check,
            latest_hostility_tick: self.tick_to_check,
            earliest_hostility_collided: false,
            stop_checking_at: self.stop_checking_at,
        }
    }
}

impl ReconcilingState {
    pub fn tally(&mut self, username: &str, class: UnitClass) {
        *self
            .player_unit_counts
            .entry(username.to_string())
            .or_default()
            .entry(class)
            .or_insert(0) += 1;
    }

    /// Drops the working-only fields and freezes the record.
    pub fn finish(
        self,
        room: &str,
        battle_still_ongoing: bool,
        alliances: BTreeMap<String, Option<String>>,
    ) -> FinishedBattle {
        FinishedBattle {
            room: room.to_string(),
            duration: self.latest_hostility_tick - self.earliest_hostility_tick + 1,
            earliest_hostility_tick: self.earliest_hostility_tick,
            latest_hostility_tick: self.latest_hostility_tick,
            earliest_hostility_collided: self.earliest_hostility_collided,
            battle_still_ongoing,
            owner: self.owner,
            rcl: self.rcl,
            player_unit_counts: self.player_unit_counts,
            alliances,
            finished_at: Utc::now(),
        }
    }
}

/// Completed battle record, produced once and reported once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedBattle {
    pub room: String,
    pub duration: u64,
    pub earliest_hostility_tick: Tick,
    pub latest_hostility_tick: Tick,
    #[serde(default)]
    pub earliest_hostility_collided: bool,
    pub battle_still_ongoing: bool,
    pub owner: Option<String>,
    pub rcl: u32,
    pub player_unit_counts: UnitCounts,
    pub alliances: BTreeMap<String, Option<String>>,
    pub finished_at: DateTime<Utc>,
}

impl FinishedBattle {
    pub fn players(&self) -> impl Iterator<Item = &str> {
        self.player_unit_counts.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_aligns_stop_horizon() {
        let state = BattleState::seed("E1N1", 1013, 120);
        match state.phase {
            BattlePhase::Seed(seed) => {
                assert_eq!(seed.tick_to_check, 1013);
                assert_eq!(seed.stop_checking_at, 1120);
            }
            other => panic!("unexpected phase {:?}", other),
        }
    }

    #[test]
    fn state_serializes_with_phase_tag() {
        let state = BattleState::seed("E1N1", 1000, 120);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["phase"]["phase"], "seed");
        let back: BattleState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn finish_computes_inclusive_duration() {
        let seed = SeedState {
            tick_to_check: 1005,
            stop_checking_at: 1120,
        };
        let mut working = seed.begin(1000);
        working.latest_hostility_tick = 1030;
        working.tally("alice", UnitClass::Healer);
        working.tally("alice", UnitClass::Healer);

        let finished = working.finish("E1N1", false, BTreeMap::new());
        assert_eq!(finished.duration, 26);
        assert_eq!(finished.player_unit_counts["alice"][&UnitClass::Healer], 2);
        assert!(!finished.earliest_hostility_collided);
    }
}
