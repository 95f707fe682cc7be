//! Remote game API collaborators.

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::ReporterResult;
use crate::model::{HistorySnapshot, Tick};

pub mod client;
pub mod users;

pub use client::ScreepsClient;
pub use users::ScreepsUserResolver;

#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// The history document starting at `tick`, or `None` if it has not been
    /// generated (yet). Upstream corruption comes back as an empty snapshot.
    async fn fetch_history(
        &self,
        room: &str,
        tick: Tick,
    ) -> ReporterResult<Option<HistorySnapshot>>;
}

/// Where the battle feed should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedQuery {
    /// Everything hostile since this tick.
    Since(Tick),
    /// The last `n` ticks.
    Interval(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BattleSummary {
    /// Latest tick the feed has seen.
    pub time: Tick,
    #[serde(default)]
    pub rooms: Vec<RoomBattle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomBattle {
    #[serde(rename = "_id")]
    pub room: String,
    #[serde(rename = "lastPvpTime")]
    pub last_pvp_tick: Tick,
}

#[async_trait]
pub trait BattleFeed: Send + Sync {
    async fn battles(&self, query: FeedQuery) -> ReporterResult<BattleSummary>;
}

#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn username(&self, user_id: &str) -> ReporterResult<String>;

    /// The alliance `username` belongs to, if any.
    async fn alliance(&self, username: &str) -> ReporterResult<Option<String>>;
}
