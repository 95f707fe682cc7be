use std::collections::BTreeMap;

use crate::constants::PEACE_GAP;
use crate::model::history::{is_system_user, HistorySnapshot, Tick};
use crate::model::{identify_creep, Direction, ReconcilingState};

/// Resolved usernames by user id, gathered before a merge so the merge itself stays pure.
pub type Usernames = BTreeMap<String, String>;

/// Folds one history snapshot into the working state.
///
/// New creeps are tallied under their owner, the first controller seen fixes
/// the room owner, and the hostility window is widened by whatever hostile
/// ticks the snapshot holds. Returns whether the battle still reaches into
/// this snapshot in `direction`: the distance between the known window edge
/// and this snapshot's nearest hostile tick (or its far edge, if it had none)
/// is below [`PEACE_GAP`]. Snapshots without any tick count as contiguous.
pub fn merge_snapshot(
    state: &mut ReconcilingState,
    snapshot: &HistorySnapshot,
    direction: Direction,
    usernames: &Usernames,
) -> bool {
    let name_of = |user_id: &str| {
        usernames
            .get(user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string())
    };

    let mut earliest_hostile: Option<Tick> = None;
    let mut latest_hostile: Option<Tick> = None;

    for (&tick, objects) in &snapshot.ticks {
        // inside this snapshot's own window a tick can't move its edges
        let look_for_hostility = match (earliest_hostile, latest_hostile) {
            (Some(earliest), Some(latest)) => tick < earliest || tick > latest,
            _ => true,
        };
        let mut hostile_tick = false;

        for (object_id, object) in objects {
            let Some(object) = object else {
                continue;
            };

            if object.is_creep() && !state.known_unit_ids.contains(object_id) {
                state.known_unit_ids.insert(object_id.clone());
                if let Some(user) = object.user.as_deref().filter(|u| !is_system_user(u)) {
                    let class = identify_creep(object.body_parts());
                    state.tally(&name_of(user), class);
                }
            }

            if state.owner.is_none() && object.is_controller() {
                if let Some(user) = object.user.as_deref() {
                    state.owner = Some(name_of(user));
                    state.rcl = object.level.unwrap_or(0);
                } else if let Some(reserver) = object.controller_user() {
                    state.owner = Some(name_of(reserver));
                    state.rcl = 0;
                }
            }

            if look_for_hostility && !hostile_tick && object.shows_hostility() {
                hostile_tick = true;
            }
        }

        if hostile_tick {
            earliest_hostile = Some(earliest_hostile.map_or(tick, |t| t.min(tick)));
            latest_hostile = Some(latest_hostile.map_or(tick, |t| t.max(tick)));
        }
    }

    let still_a_battle = match (snapshot.first_tick(), snapshot.last_tick()) {
        (Some(first), Some(last)) => {
            let gap = match direction {
                Direction::Earliest => {
                    let reach = latest_hostile.map_or(first as i64 - 1, |t| t as i64);
                    state.earliest_hostility_tick as i64 - reach
                }
                Direction::Latest => {
                    let reach = earliest_hostile.map_or(last as i64 + 1, |t| t as i64);
                    reach - state.latest_hostility_tick as i64
                }
            };
            gap < PEACE_GAP
        }
        _ => true,
    };

    if let Some(earliest) = earliest_hostile {
        state.earliest_hostility_tick = state.earliest_hostility_tick.min(earliest);
    }
    if let Some(latest) = latest_hostile {
        state.latest_hostility_tick = state.latest_hostility_tick.max(latest);
    }

    still_a_battle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SeedState, UnitClass};
    use serde_json::{json, Value};

    fn working(seed_tick: Tick) -> ReconcilingState {
        SeedState {
            tick_to_check: seed_tick,
            stop_checking_at: seed_tick + 120,
        }
        .begin(seed_tick - seed_tick % 20)
    }

    fn snapshot(ticks: Value) -> HistorySnapshot {
        serde_json::from_value(json!({ "ticks": ticks })).unwrap()
    }

    fn creep(user: &str, parts: &[&str]) -> Value {
        let body: Vec<Value> = parts.iter().map(|p| json!({"type": p, "hits": 100})).collect();
        json!({"type": "creep", "user": user, "body": body})
    }

    fn attacking() -> Value {
        json!({"actionLog": {"attack": {"x": 10, "y": 10}}})
    }

    fn names() -> Usernames {
        [("u1", "alice"), ("u2", "bob")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn tallies_each_unit_once() {
        let mut state = working(1005);
        let snap = snapshot(json!({
            "1000": {"c1": creep("u1", &["attack", "move"]), "c2": creep("u2", &["heal"])},
            "1001": {"c1": attacking()}
        }));

        merge_snapshot(&mut state, &snap, Direction::Latest, &names());
        merge_snapshot(&mut state, &snap, Direction::Earliest, &names());

        assert_eq!(state.player_unit_counts["alice"][&UnitClass::MeleeAttacker], 1);
        assert_eq!(state.player_unit_counts["bob"][&UnitClass::Healer], 1);
        assert_eq!(state.known_unit_ids.len(), 2);
    }

    #[test]
    fn system_actors_are_known_but_not_tallied() {
        let mut state = working(1005);
        let snap = snapshot(json!({
            "1000": {"inv": creep("2", &["attack"]), "sk": creep("3", &["attack"])}
        }));
        merge_snapshot(&mut state, &snap, Direction::Latest, &names());
        assert!(state.player_unit_counts.is_empty());
        assert!(state.known_unit_ids.contains("inv"));
        assert!(state.known_unit_ids.contains("sk"));
    }

    #[test]
    fn first_controller_fixes_owner() {
        let mut state = working(1005);
        let reserved = snapshot(json!({
            "1000": {"ctrl": {"type": "controller", "reservation": {"user": "u2"}}}
        }));
        merge_snapshot(&mut state, &reserved, Direction::Latest, &names());
        assert_eq!(state.owner.as_deref(), Some("bob"));
        assert_eq!(state.rcl, 0);

        let owned = snapshot(json!({
            "1020": {"ctrl": {"type": "controller", "user": "u1", "level": 6}}
        }));
        merge_snapshot(&mut state, &owned, Direction::Latest, &names());
        assert_eq!(state.owner.as_deref(), Some("bob"));
    }

    #[test]
    fn owned_controller_records_level() {
        let mut state = working(1005);
        let owned = snapshot(json!({
            "1000": {"ctrl": {"type": "controller", "user": "u1", "level": 6}}
        }));
        merge_snapshot(&mut state, &owned, Direction::Latest, &names());
        assert_eq!(state.owner.as_deref(), Some("alice"));
        assert_eq!(state.rcl, 6);
    }

    #[test]
    fn window_only_widens() {
        let mut state = working(1005);
        let inner = snapshot(json!({ "1003": {"c": attacking()} }));
        merge_snapshot(&mut state, &inner, Direction::Earliest, &names());
        assert_eq!(state.earliest_hostility_tick, 1003);
        assert_eq!(state.latest_hostility_tick, 1005);

        let narrower = snapshot(json!({ "1004": {"c": attacking()} }));
        merge_snapshot(&mut state, &narrower, Direction::Latest, &names());
        assert_eq!(state.earliest_hostility_tick, 1003);
        assert_eq!(state.latest_hostility_tick, 1005);

        let later = snapshot(json!({ "1030": {"c": attacking()}, "1021": {"c": attacking()} }));
        merge_snapshot(&mut state, &later, Direction::Latest, &names());
        assert_eq!(state.latest_hostility_tick, 1030);
    }

    #[test]
    fn forward_gap_below_peace_continues() {
        let mut state = working(1005);
        // quiet snapshot whose last tick is 1053: gap = 1054 - 1005 = 49
        let quiet = snapshot(json!({ "1040": {}, "1053": {} }));
        assert!(merge_snapshot(&mut state, &quiet, Direction::Latest, &names()));
    }

    #[test]
    fn forward_gap_at_peace_ends() {
        let mut state = working(1005);
        // gap = 1054 + 1 - 1005 = 50
        let quiet = snapshot(json!({ "1040": {}, "1054": {} }));
        assert!(!merge_snapshot(&mut state, &quiet, Direction::Latest, &names()));
    }

    #[test]
    fn forward_gap_uses_earliest_hostile_tick() {
        let mut state = working(1005);
        let hostile = snapshot(json!({ "1060": {}, "1055": {"c": attacking()} }));
        // gap = 1055 - 1005 = 50
        assert!(!merge_snapshot(&mut state, &hostile, Direction::Latest, &names()));
        // the window still widens to the ticks found
        assert_eq!(state.latest_hostility_tick, 1055);
    }

    #[test]
    fn backward_gap_uses_latest_hostile_or_first_tick() {
        let mut state = working(1005);
        let hostile = snapshot(json!({ "980": {"c": attacking()}, "956": {"c": attacking()} }));
        // gap = 1005 - 980 = 25
        assert!(merge_snapshot(&mut state, &hostile, Direction::Earliest, &names()));
        assert_eq!(state.earliest_hostility_tick, 956);

        // quiet, first tick 907: gap = 956 - 906 = 50
        let quiet = snapshot(json!({ "907": {}, "920": {} }));
        assert!(!merge_snapshot(&mut state, &quiet, Direction::Earliest, &names()));

        // quiet, first tick 908: gap = 956 - 907 = 49
        let closer = snapshot(json!({ "908": {} }));
        assert!(merge_snapshot(&mut state, &closer, Direction::Earliest, &names()));
    }

    #[test]
    fn empty_snapshot_keeps_searching() {
        let mut state = working(1005);
        let before = state.clone();
        assert!(merge_snapshot(
            &mut state,
            &HistorySnapshot::empty(),
            Direction::Latest,
            &names()
        ));
        assert!(merge_snapshot(
            &mut state,
            &HistorySnapshot::empty(),
            Direction::Earliest,
            &names()
        ));
        assert_eq!(state, before);
    }

    #[test]
    fn heal_and_ranged_heal_count_as_hostile() {
        let mut state = working(1005);
        let snap = snapshot(json!({
            "1010": {"h": {"actionLog": {"heal": {"x": 1, "y": 1}}}},
            "1012": {"h": {"actionLog": {"rangedHeal": {"x": 1, "y": 1}}}}
        }));
        merge_snapshot(&mut state, &snap, Direction::Latest, &names());
        assert_eq!(state.latest_hostility_tick, 1012);
    }
}
