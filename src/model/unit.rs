use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::history::BodyPart;

const MOVE: &str = "move";
const TOUGH: &str = "tough";
const WORK: &str = "work";
const CARRY: &str = "carry";
const CLAIM: &str = "claim";
const ATTACK: &str = "attack";
const RANGED_ATTACK: &str = "ranged_attack";
const HEAL: &str = "heal";

/// Role label a creep is tallied under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum UnitClass {
    RangedAttacker,
    MeleeAttacker,
    Healer,
    Dismantler,
    GeneralAttacker,
    ToughGuy,
    Civilian,
    MultiPurposeAttacker,
    Scout,
    /// Body that fits no known role, labelled by part initials.
    Unknown(String),
}

impl UnitClass {
    pub fn label(&self) -> &str {
        match self {
            Self::RangedAttacker => "ranged attacker",
            Self::MeleeAttacker => "melee attacker",
            Self::Healer => "healer",
            Self::Dismantler => "dismantler",
            Self::GeneralAttacker => "general attacker",
            Self::ToughGuy => "tough guy",
            Self::Civilian => "civilian",
            Self::MultiPurposeAttacker => "multi-purpose attacker",
            Self::Scout => "scout",
            Self::Unknown(label) => label,
        }
    }

    /// Civilians and scouts wandering into a room don't make a battle.
    pub fn is_combatant(&self) -> bool {
        !matches!(self, Self::Civilian | Self::Scout)
    }
}

impl fmt::Display for UnitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<UnitClass> for String {
    fn from(class: UnitClass) -> Self {
        class.label().to_string()
    }
}

impl From<String> for UnitClass {
    fn from(label: String) -> Self {
        match label.as_str() {
            "ranged attacker" => Self::RangedAttacker,
            "melee attacker" => Self::MeleeAttacker,
            "healer" => Self::Healer,
            "dismantler" => Self::Dismantler,
            "general attacker" => Self::GeneralAttacker,
            "tough guy" => Self::ToughGuy,
            "civilian" => Self::Civilian,
            "multi-purpose attacker" => Self::MultiPurposeAttacker,
            "scout" => Self::Scout,
            _ => Self::Unknown(label),
        }
    }
}

/// Boolean facts about a body that the role table is written against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyTraits {
    pub ranged: bool,
    pub heal: bool,
    pub attack: bool,
    pub work: bool,
    pub carry: bool,
    pub claim: bool,
    pub work_count: usize,
    pub only_move_or_tough: bool,
    pub only_move: bool,
}

impl BodyTraits {
    pub fn of(body: &[BodyPart]) -> Self {
        let has = |part: &str| body.iter().any(|p| p.part == part);
        Self {
            ranged: has(RANGED_ATTACK),
            heal: has(HEAL),
            attack: has(ATTACK),
            work: has(WORK),
            carry: has(CARRY),
            claim: has(CLAIM),
            work_count: body.iter().filter(|p| p.part == WORK).count(),
            only_move_or_tough: body.iter().all(|p| p.part == MOVE || p.part == TOUGH),
            only_move: body.iter().all(|p| p.part == MOVE),
        }
    }

    /// The role table. Rules overlap, so order matters: first match wins.
    pub fn classify(&self) -> Option<UnitClass> {
        let t = self;
        let armed = t.ranged || t.heal || t.attack;
        let utility = t.work || t.carry || t.claim;

        if t.ranged && !t.attack {
            Some(UnitClass::RangedAttacker)
        } else if t.attack && !t.ranged {
            Some(UnitClass::MeleeAttacker)
        } else if t.heal && !t.ranged && !t.attack {
            Some(UnitClass::Healer)
        } else if t.work && !t.carry && t.work_count > 8 {
            Some(UnitClass::Dismantler)
        } else if armed && !t.carry {
            Some(UnitClass::GeneralAttacker)
        } else if t.only_move_or_tough {
            Some(UnitClass::ToughGuy)
        } else if utility && !armed {
            Some(UnitClass::Civilian)
        } else if utility && armed {
            Some(UnitClass::MultiPurposeAttacker)
        } else if t.only_move {
            Some(UnitClass::Scout)
        } else {
            None
        }
    }
}

/// Classifies a creep by its body.
pub fn identify_creep(body: &[BodyPart]) -> UnitClass {
    if let Some(class) = BodyTraits::of(body).classify() {
        return class;
    }

    let label = initials(body);
    info!("Couldn't describe creep body {:?}, labelling it {}", body, label);
    crate::metrics::UNCLASSIFIED_UNITS_TOTAL.inc();
    UnitClass::Unknown(label)
}

fn initials(body: &[BodyPart]) -> String {
    let distinct: BTreeSet<&str> = body.iter().map(|p| p.part.as_str()).collect();
    distinct
        .iter()
        .filter_map(|part| part.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(parts: &[&str]) -> Vec<BodyPart> {
        parts.iter().map(|p| BodyPart::new(p)).collect()
    }

    #[test]
    fn fixed_roles() {
        let cases: &[(&[&str], UnitClass)] = &[
            (&["ranged_attack", "move"], UnitClass::RangedAttacker),
            (&["ranged_attack", "heal", "carry"], UnitClass::RangedAttacker),
            (&["attack", "move", "carry"], UnitClass::MeleeAttacker),
            (&["heal", "move"], UnitClass::Healer),
            (&["heal", "work", "carry"], UnitClass::Healer),
            (&["work"; 9], UnitClass::Dismantler),
            (&["attack", "ranged_attack", "move"], UnitClass::GeneralAttacker),
            (&["tough", "move", "tough"], UnitClass::ToughGuy),
            (&["work", "carry", "move"], UnitClass::Civilian),
            (&["claim", "move"], UnitClass::Civilian),
            (&["work"; 8], UnitClass::Civilian),
            (
                &["attack", "ranged_attack", "carry"],
                UnitClass::MultiPurposeAttacker,
            ),
        ];
        for (parts, expected) in cases {
            assert_eq!(&identify_creep(&body(parts)), expected, "body {:?}", parts);
        }
    }

    #[test]
    fn tough_guy_wins_before_scout() {
        // all-move also satisfies the move-or-tough rule, which comes first
        assert_eq!(identify_creep(&body(&["move", "move"])), UnitClass::ToughGuy);
        assert_eq!(identify_creep(&[]), UnitClass::ToughGuy);
    }

    #[test]
    fn unknown_bodies_get_initials() {
        let class = identify_creep(&body(&["move", "weird_part", "move"]));
        assert_eq!(class, UnitClass::Unknown("MW".to_string()));
    }

    #[test]
    fn classification_is_total_over_predicates() {
        // Only bodies with no armed, utility, or movement-only shape fall through.
        for bits in 0u32..(1 << 8) {
            let traits = BodyTraits {
                ranged: bits & 1 != 0,
                heal: bits & 2 != 0,
                attack: bits & 4 != 0,
                work: bits & 8 != 0,
                carry: bits & 16 != 0,
                claim: bits & 32 != 0,
                work_count: if bits & 8 != 0 { 9 } else { 0 },
                only_move_or_tough: bits & 64 != 0,
                only_move: bits & 128 != 0,
            };
            let armed = traits.ranged || traits.heal || traits.attack;
            let utility = traits.work || traits.carry || traits.claim;
            let unmatched =
                !armed && !utility && !traits.only_move_or_tough && !traits.only_move;
            assert_eq!(traits.classify().is_none(), unmatched, "traits {:?}", traits);
        }
    }

    #[test]
    fn labels_round_trip_through_strings() {
        let class: UnitClass = String::from("multi-purpose attacker").into();
        assert_eq!(class, UnitClass::MultiPurposeAttacker);
        let custom: UnitClass = String::from("MW").into();
        assert_eq!(custom.label(), "MW");
    }
}
