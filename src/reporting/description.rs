use std::collections::BTreeMap;

use crate::model::{FinishedBattle, Tick, UnitClass};

const HISTORY_VIEWER: &str = "https://screeps.com/a/#!/history";

/// `017`, or `120+` while still ongoing.
pub fn describe_duration(battle: &FinishedBattle) -> String {
    if battle.battle_still_ongoing {
        format!("{:03}+", battle.duration)
    } else {
        format!("{:03}", battle.duration)
    }
}

/// `alice (TAS) vs bob`
pub fn describe_players(battle: &FinishedBattle) -> String {
    battle
        .players()
        .map(|player| match battle.alliances.get(player).and_then(Option::as_deref) {
            Some(alliance) => format!("{} ({})", player, alliance),
            None => player.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" vs ")
}

/// Every player's units, room owner first.
pub fn describe_units(battle: &FinishedBattle) -> String {
    let owner = battle.owner.as_deref();
    let mut players: Vec<_> = battle.player_unit_counts.iter().collect();
    players.sort_by(|(a, _), (b, _)| {
        (Some(a.as_str()) != owner, a.as_str()).cmp(&(Some(b.as_str()) != owner, b.as_str()))
    });
    players
        .into_iter()
        .map(|(name, units)| format!("{}'s {}", name, describe_player_units(units)))
        .collect::<Vec<_>>()
        .join(" vs ")
}

/// `1 healer, 2 scouts and 3 tough guys`
pub fn describe_player_units(units: &BTreeMap<UnitClass, u32>) -> String {
    let mut units: Vec<_> = units.iter().collect();
    units.sort_by(|a, b| a.0.label().cmp(b.0.label()));
    let mut parts: Vec<String> = units
        .into_iter()
        .map(|(class, count)| describe_unit(class, *count))
        .collect();

    match parts.pop() {
        Some(last) if !parts.is_empty() => format!("{} and {}", parts.join(", "), last),
        Some(last) => last,
        None => String::new(),
    }
}

pub fn describe_unit(class: &UnitClass, count: u32) -> String {
    if count > 1 {
        format!("{} {}s", count, class)
    } else {
        format!("{} {}", count, class)
    }
}

/// ` (defender alice, RCL 4)`, ` (reserved by alice)`, or empty for unowned rooms.
pub fn describe_defender(battle: &FinishedBattle) -> String {
    match (&battle.owner, battle.rcl) {
        (Some(owner), 0) => format!(" (reserved by {})", owner),
        (Some(owner), rcl) => format!(" (defender {}, RCL {})", owner, rcl),
        (None, _) => String::new(),
    }
}

/// History viewer link a few ticks before the first hostility.
pub fn history_link(room: &str, earliest_hostility_tick: Tick) -> String {
    format!(
        "{}/{}?t={}",
        HISTORY_VIEWER,
        room,
        earliest_hostility_tick.saturating_sub(5)
    )
}
