use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::constants::SYSTEM_USER_IDS;

pub type Tick = u64;

/// One `room-history/{room}/{tick}.json` document.
///
/// The first tick of a document carries full objects; later ticks only carry
/// the fields that changed, and `null` for objects that disappeared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySnapshot {
    #[serde(default, deserialize_with = "lenient_ticks")]
    pub ticks: BTreeMap<Tick, BTreeMap<String, Option<RoomObject>>>,
}

impl HistorySnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn first_tick(&self) -> Option<Tick> {
        self.ticks.keys().next().copied()
    }

    pub fn last_tick(&self) -> Option<Tick> {
        self.ticks.keys().next_back().copied()
    }

    /// Iterates every present (non-null) object of every tick, in tick order.
    pub fn objects(&self) -> impl Iterator<Item = (Tick, &str, &RoomObject)> {
        self.ticks.iter().flat_map(|(tick, objects)| {
            objects
                .iter()
                .filter_map(move |(id, obj)| obj.as_ref().map(|o| (*tick, id.as_str(), o)))
        })
    }

    /// User ids that a merge of this snapshot would need a username for:
    /// owners of creeps not yet in `known_units`, plus controller owners and
    /// reservers. System actors are left out.
    pub fn user_ids_to_resolve(&self, known_units: &BTreeSet<String>) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for (_, object_id, object) in self.objects() {
            if object.is_creep() && !known_units.contains(object_id) {
                if let Some(user) = &object.user {
                    if !is_system_user(user) {
                        ids.insert(user.clone());
                    }
                }
            }
            if object.is_controller() {
                if let Some(user) = object.controller_user() {
                    ids.insert(user.to_string());
                }
            }
        }
        ids
    }
}

pub fn is_system_user(user_id: &str) -> bool {
    SYSTEM_USER_IDS.contains(&user_id)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomObject {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub user: Option<String>,
    #[serde(default)]
    pub body: Option<Body>,
    #[serde(default, deserialize_with = "lenient_level")]
    pub level: Option<u32>,
    #[serde(default)]
    pub reservation: Option<Reservation>,
    #[serde(default)]
    pub action_log: Option<ActionLog>,
}

impl RoomObject {
    pub fn is_creep(&self) -> bool {
        self.kind.as_deref() == Some("creep")
    }

    pub fn is_controller(&self) -> bool {
        self.kind.as_deref() == Some("controller")
    }

    /// Owner of a controller, falling back to its reserver.
    pub fn controller_user(&self) -> Option<&str> {
        self.user.as_deref().or_else(|| {
            self.reservation
                .as_ref()
                .and_then(|r| r.user.as_deref())
        })
    }

    pub fn body_parts(&self) -> &[BodyPart] {
        match &self.body {
            Some(Body::Parts(parts)) => parts,
            _ => &[],
        }
    }

    pub fn shows_hostility(&self) -> bool {
        self.action_log
            .as_ref()
            .map(ActionLog::is_hostile)
            .unwrap_or(false)
    }
}

/// Full objects carry a body part list; diffs carry a sparse patch keyed by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Parts(Vec<BodyPart>),
    Patch(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BodyPart {
    #[serde(rename = "type")]
    pub part: String,
    #[serde(default)]
    pub hits: Option<u32>,
}

impl BodyPart {
    pub fn new(part: &str) -> Self {
        Self {
            part: part.to_string(),
            hits: Some(100),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reservation {
    #[serde(default, deserialize_with = "lenient_id")]
    pub user: Option<String>,
}

/// Non-null entries mean the action happened on that tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLog {
    #[serde(default)]
    pub attack: Option<serde_json::Value>,
    #[serde(default)]
    pub ranged_attack: Option<serde_json::Value>,
    #[serde(default)]
    pub ranged_mass_attack: Option<serde_json::Value>,
    #[serde(default)]
    pub heal: Option<serde_json::Value>,
    #[serde(default)]
    pub ranged_heal: Option<serde_json::Value>,
}

impl ActionLog {
    pub fn is_hostile(&self) -> bool {
        [
            &self.attack,
            &self.ranged_attack,
            &self.ranged_mass_attack,
            &self.heal,
            &self.ranged_heal,
        ]
        .iter()
        .any(|entry| entry.as_ref().map(is_truthy).unwrap_or(false))
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}

// A `null` tick reads as a tick without changes. An object that doesn't fit
// the expected shape is skipped instead of failing the whole document.
fn lenient_ticks<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<Tick, BTreeMap<String, Option<RoomObject>>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<Tick, Option<BTreeMap<String, serde_json::Value>>>::deserialize(
        deserializer,
    )?;
    Ok(raw
        .into_iter()
        .map(|(tick, objects)| {
            let objects = objects
                .unwrap_or_default()
                .into_iter()
                .map(|(id, value)| {
                    let object = match value {
                        serde_json::Value::Null => None,
                        value => match serde_json::from_value::<RoomObject>(value) {
                            Ok(object) => Some(object),
                            Err(e) => {
                                debug!("Skipping unreadable object {} at tick {}: {}", id, tick, e);
                                None
                            }
                        },
                    };
                    (id, object)
                })
                .collect();
            (tick, objects)
        })
        .collect())
}

fn lenient_level<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// user ids show up as strings, but older documents use numbers
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_objects_diffs_and_nulls() {
        let doc = json!({
            "timestamp": 1,
            "room": "E1N1",
            "ticks": {
                "1000": {
                    "c1": {
                        "type": "creep",
                        "user": "u1",
                        "body": [{"type": "attack", "hits": 100}]
                    },
                    "ctrl": {"type": "controller", "user": "u2", "level": 5}
                },
                "1001": {
                    "c1": {"body": {"0": {"hits": 40}}, "actionLog": {"attack": {"x": 1, "y": 2}}},
                    "gone": null
                }
            }
        });
        let snapshot: HistorySnapshot = serde_json::from_value(doc).unwrap();
        assert_eq!(snapshot.first_tick(), Some(1000));
        assert_eq!(snapshot.last_tick(), Some(1001));
        assert_eq!(snapshot.objects().count(), 3);

        let diff = snapshot.ticks[&1001]["c1"].as_ref().unwrap();
        assert!(diff.body_parts().is_empty());
        assert!(diff.shows_hostility());
    }

    #[test]
    fn null_action_entries_are_not_hostile() {
        let log: ActionLog =
            serde_json::from_value(json!({"attack": null, "heal": {}, "say": "hi"})).unwrap();
        assert!(!log.is_hostile());
        let log: ActionLog = serde_json::from_value(json!({"rangedHeal": {"x": 3}})).unwrap();
        assert!(log.is_hostile());
    }

    #[test]
    fn odd_ticks_and_objects_do_not_sink_the_document() {
        let doc = json!({
            "ticks": {
                "1000": {
                    "c1": {"type": "creep", "user": "u1", "body": [{"type": "attack"}]},
                    "ctrl": {"type": "controller", "user": "u2", "level": "5"},
                    "odd": {"type": "creep", "actionLog": "garbage"}
                },
                "1001": null,
                "1002": {"c1": {"actionLog": {"attack": {"x": 1, "y": 1}}}}
            }
        });
        let snapshot: HistorySnapshot = serde_json::from_value(doc).unwrap();
        assert_eq!(snapshot.ticks.len(), 3);
        assert!(snapshot.ticks[&1001].is_empty());
        assert_eq!(snapshot.ticks[&1000]["ctrl"].as_ref().unwrap().level, Some(5));
        assert!(snapshot.ticks[&1000]["odd"].is_none());
        assert!(snapshot.ticks[&1002]["c1"].as_ref().unwrap().shows_hostility());
    }

    #[test]
    fn numeric_user_ids_are_accepted() {
        let obj: RoomObject =
            serde_json::from_value(json!({"type": "creep", "user": 2, "body": []})).unwrap();
        assert_eq!(obj.user.as_deref(), Some("2"));
    }

    #[test]
    fn reservation_stands_in_for_owner() {
        let obj: RoomObject = serde_json::from_value(
            json!({"type": "controller", "reservation": {"user": "u9", "endTime": 5}}),
        )
        .unwrap();
        assert_eq!(obj.controller_user(), Some("u9"));
    }

    #[test]
    fn resolve_set_skips_known_units_and_system_actors() {
        let doc = json!({
            "ticks": {
                "20": {
                    "a": {"type": "creep", "user": "u1", "body": []},
                    "b": {"type": "creep", "user": "u2", "body": []},
                    "inv": {"type": "creep", "user": "2", "body": []},
                    "ctrl": {"type": "controller", "user": "u3", "level": 1}
                }
            }
        });
        let snapshot: HistorySnapshot = serde_json::from_value(doc).unwrap();
        let known: BTreeSet<String> = ["b".to_string()].into_iter().collect();
        let ids: Vec<String> = snapshot.user_ids_to_resolve(&known).into_iter().collect();
        assert_eq!(ids, vec!["u1".to_string(), "u3".to_string()]);
    }
}
