#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use battle_reporter::{
    delivery::{Channel, DeliveryAdapter},
    env::Settings,
    errors::{ReporterError, ReporterResult},
    model::{HistorySnapshot, Tick},
    pipeline::MemoryStore,
    screeps::{BattleFeed, BattleSummary, FeedQuery, HistoryProvider, RoomBattle, UserResolver},
    AppContext,
};
use serde_json::{json, Value};

pub const SETTINGS: &str = r#"
    [logging]
    directory = "logs"
    filename = "battle_reporter.log"

    [server]
    bind_address = "127.0.0.1"
    port = 9100
    log_level = "debug"

    [redis]
    url = "redis://127.0.0.1:6379"
    key_prefix = "test:"
    schema_version = "0.2"
    operation_timeout_seconds = 1

    [screeps]
    api_root = "http://localhost/"
    alliances_url = "http://localhost/alliances.js"
    battles_lookback_interval = 50
    request_timeout_seconds = 1

    [worker]
    ingest_interval_seconds = 1
    pending_retry_seconds = 1
    idle_poll_seconds = 1
    report_interval_seconds = 1

    [channels]
    cli = true
    slack_batch_separator = "\n---\n"

    [retry]
    initial_interval_ms = 10
    max_interval_ms = 20
    max_elapsed_time_ms = 100
"#;

pub fn settings() -> Settings {
    Settings::from_toml_str(SETTINGS).expect("test settings parse")
}

/// `{"ticks": ticks}` as a snapshot.
pub fn snapshot(ticks: Value) -> HistorySnapshot {
    serde_json::from_value(json!({ "ticks": ticks })).expect("snapshot json")
}

pub fn creep(user: &str, parts: &[&str]) -> Value {
    let body: Vec<Value> = parts
        .iter()
        .map(|part| json!({"type": part, "hits": 100}))
        .collect();
    json!({"type": "creep", "user": user, "body": body})
}

pub fn controller(user: &str, level: u32) -> Value {
    json!({"type": "controller", "user": user, "level": level})
}

pub fn attacking() -> Value {
    json!({"actionLog": {"attack": {"x": 25, "y": 25}}})
}

#[derive(Clone)]
pub enum Scripted {
    Doc(HistorySnapshot),
    Fail,
}

/// History provider answering from a script; unscripted ticks are 404s.
#[derive(Default)]
pub struct ScriptedHistory {
    docs: Mutex<HashMap<(String, Tick), Scripted>>,
    calls: Mutex<Vec<(String, Tick)>>,
}

impl ScriptedHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, room: &str, tick: Tick, doc: HistorySnapshot) {
        self.docs
            .lock()
            .unwrap()
            .insert((room.to_string(), tick), Scripted::Doc(doc));
    }

    pub fn fail(&self, room: &str, tick: Tick) {
        self.docs
            .lock()
            .unwrap()
            .insert((room.to_string(), tick), Scripted::Fail);
    }

    pub fn withdraw(&self, room: &str, tick: Tick) {
        self.docs.lock().unwrap().remove(&(room.to_string(), tick));
    }

    pub fn calls(&self) -> Vec<(String, Tick)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn ticks_fetched(&self, room: &str) -> Vec<Tick> {
        self.calls()
            .into_iter()
            .filter(|(r, _)| r == room)
            .map(|(_, tick)| tick)
            .collect()
    }
}

#[async_trait]
impl HistoryProvider for ScriptedHistory {
    async fn fetch_history(
        &self,
        room: &str,
        tick: Tick,
    ) -> ReporterResult<Option<HistorySnapshot>> {
        self.calls.lock().unwrap().push((room.to_string(), tick));
        let scripted = self
            .docs
            .lock()
            .unwrap()
            .get(&(room.to_string(), tick))
            .cloned();
        match scripted {
            Some(Scripted::Doc(doc)) => Ok(Some(doc)),
            Some(Scripted::Fail) => Err(ReporterError::api(
                502,
                format!("room-history/{}/{}.json", room, tick),
                "Bad Gateway",
            )),
            None => Ok(None),
        }
    }
}

/// Resolver backed by fixed tables.
#[derive(Default)]
pub struct StaticUsers {
    pub names: BTreeMap<String, String>,
    pub alliances: BTreeMap<String, String>,
    pub alliance_lookups_fail: bool,
}

impl StaticUsers {
    pub fn new(names: &[(&str, &str)], alliances: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            names: names
                .iter()
                .map(|(id, name)| (id.to_string(), name.to_string()))
                .collect(),
            alliances: alliances
                .iter()
                .map(|(name, alliance)| (name.to_string(), alliance.to_string()))
                .collect(),
            alliance_lookups_fail: false,
        })
    }
}

#[async_trait]
impl UserResolver for StaticUsers {
    async fn username(&self, user_id: &str) -> ReporterResult<String> {
        self.names
            .get(user_id)
            .cloned()
            .ok_or_else(|| ReporterError::api(404, "api/user/find", user_id))
    }

    async fn alliance(&self, username: &str) -> ReporterResult<Option<String>> {
        if self.alliance_lookups_fail {
            return Err(ReporterError::internal_error("alliance roster unavailable"));
        }
        Ok(self.alliances.get(username).cloned())
    }
}

/// Battle feed returning queued summaries and recording the queries it got.
#[derive(Default)]
pub struct ScriptedFeed {
    summaries: Mutex<VecDeque<BattleSummary>>,
    queries: Mutex<Vec<FeedQuery>>,
}

impl ScriptedFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, time: Tick, rooms: &[(&str, Tick)]) {
        self.summaries.lock().unwrap().push_back(BattleSummary {
            time,
            rooms: rooms
                .iter()
                .map(|(room, tick)| RoomBattle {
                    room: room.to_string(),
                    last_pvp_tick: *tick,
                })
                .collect(),
        });
    }

    pub fn queries(&self) -> Vec<FeedQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl BattleFeed for ScriptedFeed {
    async fn battles(&self, query: FeedQuery) -> ReporterResult<BattleSummary> {
        self.queries.lock().unwrap().push(query);
        self.summaries
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ReporterError::api(503, "api/experimental/pvp", "no summary scripted"))
    }
}

/// Adapter that records what it was asked to send.
pub struct RecordingAdapter {
    channel: Channel,
    accept: Mutex<bool>,
    sent: Mutex<Vec<String>>,
}

impl RecordingAdapter {
    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            accept: Mutex::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_accepting(&self, accept: bool) {
        *self.accept.lock().unwrap() = accept;
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryAdapter for RecordingAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(&self, message: &str) -> bool {
        if !*self.accept.lock().unwrap() {
            return false;
        }
        self.sent.lock().unwrap().push(message.to_string());
        true
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub history: Arc<ScriptedHistory>,
    pub feed: Arc<ScriptedFeed>,
    pub cli: Arc<RecordingAdapter>,
    pub slack: Arc<RecordingAdapter>,
    pub ctx: AppContext,
}

/// In-memory pipeline with scripted collaborators and recording cli/slack adapters.
pub fn harness(users: Arc<StaticUsers>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let history = ScriptedHistory::new();
    let feed = ScriptedFeed::new();
    let cli = RecordingAdapter::new(Channel::Cli);
    let slack = RecordingAdapter::new(Channel::Slack);
    let ctx = AppContext::new(
        settings(),
        store.clone(),
        history.clone(),
        feed.clone(),
        users,
        vec![cli.clone() as Arc<dyn DeliveryAdapter>, slack.clone()],
    );
    Harness {
        store,
        history,
        feed,
        cli,
        slack,
        ctx,
    }
}
