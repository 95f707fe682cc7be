use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    env::ScreepsSettings,
    errors::{ReporterError, ReporterResult},
    model::{HistorySnapshot, Tick},
    screeps::{BattleFeed, BattleSummary, FeedQuery, HistoryProvider},
};

/// Alliance abbreviation to roster, as served by the alliances listing.
pub type AllianceRoster = BTreeMap<String, AllianceMembers>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllianceMembers {
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Deserialize)]
struct FindUserResponse {
    user: Option<FoundUser>,
}

#[derive(Deserialize)]
struct FoundUser {
    username: Option<String>,
}

/// Thin reqwest wrapper over the public game API.
#[derive(Debug, Clone)]
pub struct ScreepsClient {
    http_client: reqwest::Client,
    api_root: String,
    alliances_url: String,
    token: Option<String>,
}

impl ScreepsClient {
    pub fn new(settings: &ScreepsSettings) -> ReporterResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_seconds))
            .build()?;
        Ok(Self::with_client(http_client, settings))
    }

    pub fn with_client(http_client: reqwest::Client, settings: &ScreepsSettings) -> Self {
        let mut api_root = settings.api_root.clone();
        if !api_root.ends_with('/') {
            api_root.push('/');
        }
        Self {
            http_client,
            api_root,
            alliances_url: settings.alliances_url.clone(),
            token: settings.token.clone(),
        }
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.http_client
    }

    fn history_url(&self, room: &str, tick: Tick) -> String {
        format!("{}room-history/{}/{}.json", self.api_root, room, tick)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        let request = self.http_client.get(url);
        match &self.token {
            Some(token) => request.header("X-Token", token),
            None => request,
        }
    }

    async fn ensure_success(url: &str, response: Response) -> ReporterResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ReporterError::api(status.as_u16(), url, body))
    }

    pub async fn find_username(&self, user_id: &str) -> ReporterResult<String> {
        let url = format!("{}api/user/find", self.api_root);
        let response = self.get(&url).query(&[("id", user_id)]).send().await?;
        let response = Self::ensure_success(&url, response).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        let found: FindUserResponse = serde_json::from_str(&body)?;
        found
            .user
            .and_then(|user| user.username)
            .ok_or_else(|| ReporterError::api(status, url, body))
    }

    pub async fn fetch_alliances(&self) -> ReporterResult<AllianceRoster> {
        let response = self.http_client.get(&self.alliances_url).send().await?;
        let response = Self::ensure_success(&self.alliances_url, response).await?;
        Ok(response.json::<AllianceRoster>().await?)
    }
}

#[async_trait]
impl HistoryProvider for ScreepsClient {
    async fn fetch_history(
        &self,
        room: &str,
        tick: Tick,
    ) -> ReporterResult<Option<HistorySnapshot>> {
        let url = self.history_url(room, tick);
        let response = self.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("History {} not generated yet", url);
            return Ok(None);
        }
        let response = Self::ensure_success(&url, response).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_history(&url, status, &body).map(Some)
    }
}

/// 200 responses are sometimes empty or truncated; both read as a snapshot
/// without ticks. A literal `null` document is an upstream error.
fn parse_history(url: &str, status: u16, body: &str) -> ReporterResult<HistorySnapshot> {
    if body.trim().is_empty() {
        warn!("Empty history document from {}; treating it as empty", url);
        return Ok(HistorySnapshot::empty());
    }
    match serde_json::from_str::<Option<HistorySnapshot>>(body) {
        Ok(Some(snapshot)) => Ok(snapshot),
        Ok(None) => Err(ReporterError::api(status, url, body)),
        Err(e) => {
            warn!(
                "Invalid JSON from {} ({}); treating it as an empty history document",
                url, e
            );
            Ok(HistorySnapshot::empty())
        }
    }
}

#[async_trait]
impl BattleFeed for ScreepsClient {
    async fn battles(&self, query: FeedQuery) -> ReporterResult<BattleSummary> {
        let url = format!("{}api/experimental/pvp", self.api_root);
        let request = match query {
            FeedQuery::Since(tick) => self.get(&url).query(&[("start", tick)]),
            FeedQuery::Interval(interval) => self.get(&url).query(&[("interval", interval)]),
        };
        let response = Self::ensure_success(&url, request.send().await?).await?;
        Ok(response.json::<BattleSummary>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(api_root: &str) -> ScreepsSettings {
        ScreepsSettings {
            api_root: api_root.to_string(),
            alliances_url: "http://localhost/alliances.js".to_string(),
            token: None,
            battles_lookback_interval: 50,
            request_timeout_seconds: 5,
        }
    }

    #[test]
    fn history_url_tolerates_missing_trailing_slash() {
        let client =
            ScreepsClient::with_client(reqwest::Client::new(), &settings("https://screeps.com"));
        assert_eq!(
            client.history_url("E1N1", 1000),
            "https://screeps.com/room-history/E1N1/1000.json"
        );
    }

    #[test]
    fn corrupt_documents_read_as_empty() {
        let snapshot = parse_history("u", 200, "{\"ticks\": {\"1000\": ").unwrap();
        assert!(snapshot.ticks.is_empty());
        let snapshot = parse_history("u", 200, "  ").unwrap();
        assert!(snapshot.ticks.is_empty());
    }

    #[test]
    fn null_document_is_an_error() {
        let err = parse_history("u", 200, "null").unwrap_err();
        assert!(matches!(err, ReporterError::Api { status: 200, .. }));
    }

    #[test]
    fn parses_battle_feed() {
        let body = r#"{"ok":1,"time":16000,"rooms":[{"_id":"E1N1","lastPvpTime":15990}]}"#;
        let summary: BattleSummary = serde_json::from_str(body).unwrap();
        assert_eq!(summary.time, 16000);
        assert_eq!(summary.rooms[0].room, "E1N1");
        assert_eq!(summary.rooms[0].last_pvp_tick, 15990);
    }

    #[test]
    fn parses_alliance_roster() {
        let body = r#"{"TAS": {"name": "Test Alliance", "members": ["alice", "bob"]}}"#;
        let roster: AllianceRoster = serde_json::from_str(body).unwrap();
        assert_eq!(roster["TAS"].members, vec!["alice", "bob"]);
    }
}
