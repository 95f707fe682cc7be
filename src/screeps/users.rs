use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::{debug, info, warn};

use crate::{
    constants::{ALLIANCES_FETCHED_EXPIRE, ALLIANCE_CACHE_EXPIRE, USERNAME_CACHE_EXPIRE},
    errors::ReporterResult,
    pipeline::{with_redis_timeout, KeyScheme},
    screeps::{client::AllianceRoster, ScreepsClient, UserResolver},
};

/// Username and alliance lookups, read through a Redis cache.
///
/// Usernames are cached per id. Alliances come from a full roster that is
/// refetched at most once per [`ALLIANCES_FETCHED_EXPIRE`]; a failed fetch
/// still arms that timer so an unreachable roster is not hammered.
#[derive(Clone)]
pub struct ScreepsUserResolver {
    client: ScreepsClient,
    redis: ConnectionManager,
    keys: KeyScheme,
    timeout_secs: u64,
}

impl ScreepsUserResolver {
    pub fn new(
        client: ScreepsClient,
        redis: ConnectionManager,
        keys: KeyScheme,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client,
            redis,
            keys,
            timeout_secs,
        }
    }

    async fn roster_is_recent(&self) -> ReporterResult<bool> {
        let key = self.keys.alliances_fetched();
        let mut redis = self.redis.clone();
        with_redis_timeout("exists_alliances_fetched", self.timeout_secs, async {
            redis.exists::<_, bool>(&key).await
        })
        .await
    }

    async fn refresh_roster(&self) -> ReporterResult<()> {
        let roster = match self.client.fetch_alliances().await {
            Ok(roster) => roster,
            Err(e) => {
                warn!("Failed to fetch alliance roster, retrying later: {}", e);
                AllianceRoster::new()
            }
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SET")
            .arg(self.keys.alliances_fetched())
            .arg(1)
            .arg("EX")
            .arg(ALLIANCES_FETCHED_EXPIRE)
            .ignore();
        let mut members = 0usize;
        for (alliance, roster) in &roster {
            for member in &roster.members {
                pipe.cmd("SET")
                    .arg(self.keys.alliance(member))
                    .arg(alliance)
                    .arg("EX")
                    .arg(ALLIANCE_CACHE_EXPIRE)
                    .ignore();
                members += 1;
            }
        }

        let mut redis = self.redis.clone();
        with_redis_timeout("update_alliance_cache", self.timeout_secs, async {
            pipe.query_async::<_, ()>(&mut redis).await
        })
        .await?;
        info!(
            "Alliance roster cached: {} alliances, {} members",
            roster.len(),
            members
        );
        Ok(())
    }
}

#[async_trait]
impl UserResolver for ScreepsUserResolver {
    async fn username(&self, user_id: &str) -> ReporterResult<String> {
        let key = self.keys.username(user_id);
        let mut redis = self.redis.clone();
        let cached = with_redis_timeout("get_username", self.timeout_secs, async {
            redis.get::<_, Option<String>>(&key).await
        })
        .await?;
        if let Some(name) = cached {
            return Ok(name);
        }

        let name = self.client.find_username(user_id).await?;
        debug!("Resolved user {} to {}", user_id, name);
        with_redis_timeout("set_username", self.timeout_secs, async {
            redis
                .set_ex::<_, _, ()>(&key, &name, USERNAME_CACHE_EXPIRE)
                .await
        })
        .await?;
        Ok(name)
    }

    async fn alliance(&self, username: &str) -> ReporterResult<Option<String>> {
        if !self.roster_is_recent().await? {
            self.refresh_roster().await?;
        }
        let key = self.keys.alliance(username);
        let mut redis = self.redis.clone();
        with_redis_timeout("get_alliance", self.timeout_secs, async {
            redis.get::<_, Option<String>>(&key).await
        })
        .await
    }
}
