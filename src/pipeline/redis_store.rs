use std::sync::Arc;

use async_trait::async_trait;
use redis::{
    aio::{Connection, ConnectionManager},
    AsyncCommands, Client as RedisClient, Script,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    constants::{BATTLE_STATE_EXPIRE, LAST_BATTLE_END_EXPIRE, LATEST_TICK_EXPIRE},
    delivery::Channel,
    env::{RedisSettings, RetrySettings},
    errors::ReporterResult,
    model::{BattleState, FinishedBattle, Tick},
    pipeline::{scripts, with_redis_timeout, KeyScheme, PipelineStore, ReportEntry},
};

#[derive(Clone)]
struct PipelineScripts {
    enqueue_processing: Script,
    finish_processing: Script,
    requeue_for_delivery: Script,
    merge_queue: Script,
}

impl PipelineScripts {
    fn load() -> Self {
        Self {
            enqueue_processing: Script::new(scripts::enqueue_processing_script()),
            finish_processing: Script::new(scripts::finish_processing_script()),
            requeue_for_delivery: Script::new(scripts::requeue_for_delivery_script()),
            merge_queue: Script::new(scripts::merge_queue_script()),
        }
    }
}

/// Dedicated connections for blocking pops, lent to one caller at a time.
struct IdleConnections<C> {
    idle: Arc<Mutex<Vec<C>>>,
}

impl<C> Clone for IdleConnections<C> {
    fn clone(&self) -> Self {
        Self {
            idle: self.idle.clone(),
        }
    }
}

impl<C> IdleConnections<C> {
    fn new() -> Self {
        Self {
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn take(&self) -> Option<C> {
        self.idle.lock().await.pop()
    }

    async fn put_back(&self, conn: C) {
        self.idle.lock().await.push(conn);
    }
}

/// [`PipelineStore`] on Redis. Multi-key steps run as Lua scripts so each
/// one is a single atomic unit on the server.
#[derive(Clone)]
pub struct RedisStore {
    client: RedisClient,
    redis: ConnectionManager,
    keys: KeyScheme,
    timeout_secs: u64,
    scripts: PipelineScripts,
    blocking: IdleConnections<Connection>,
}

impl RedisStore {
    /// Opens the connection manager, retrying with the configured backoff.
    pub async fn connect(settings: &RedisSettings, retry: &RetrySettings) -> ReporterResult<Self> {
        let client = RedisClient::open(settings.url.as_str())?;

        let redis = backoff::future::retry(retry.backoff(), || {
            let client = client.clone();
            async move {
                ConnectionManager::new(client).await.map_err(|e| {
                    warn!("Redis connection attempt failed: {} (retrying)", e);
                    backoff::Error::transient(e)
                })
            }
        })
        .await?;
        info!("Redis connection established: {}", settings.url);

        Ok(Self::with_connection(client, redis, settings))
    }

    pub fn with_connection(
        client: RedisClient,
        redis: ConnectionManager,
        settings: &RedisSettings,
    ) -> Self {
        Self {
            client,
            redis,
            keys: KeyScheme::new(&settings.key_prefix, &settings.schema_version),
            timeout_secs: settings.operation_timeout_seconds,
            scripts: PipelineScripts::load(),
            blocking: IdleConnections::new(),
        }
    }

    pub fn connection(&self) -> ConnectionManager {
        self.redis.clone()
    }

    pub fn keys(&self) -> &KeyScheme {
        &self.keys
    }

    /// BRPOPLPUSH on a dedicated connection: a blocked command would otherwise
    /// stall every other caller of the shared connection manager. The
    /// connection goes back to the idle list once the pop returns; one that
    /// failed is dropped.
    async fn blocking_rotate(&self, key: &str) -> ReporterResult<Option<String>> {
        let mut conn = match self.blocking.take().await {
            Some(conn) => conn,
            None => {
                debug!("Opening a connection for blocking pops");
                self.client.get_async_connection().await?
            }
        };
        let item: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(key)
            .arg(key)
            .arg(0)
            .query_async(&mut conn)
            .await?;
        self.blocking.put_back(conn).await;
        Ok(item)
    }

    async fn rotate(&self, key: &str, blocking: bool) -> ReporterResult<Option<String>> {
        if blocking {
            return self.blocking_rotate(key).await;
        }
        let mut redis = self.redis.clone();
        with_redis_timeout("rpoplpush", self.timeout_secs, async {
            redis.rpoplpush::<_, Option<String>>(key, key).await
        })
        .await
    }

    async fn remove_last(&self, key: &str, value: &str) -> ReporterResult<bool> {
        let mut redis = self.redis.clone();
        let removed = with_redis_timeout("lrem", self.timeout_secs, async {
            redis.lrem::<_, _, i64>(key, -1, value).await
        })
        .await?;
        Ok(removed > 0)
    }

    async fn len(&self, key: &str) -> ReporterResult<usize> {
        let mut redis = self.redis.clone();
        with_redis_timeout("llen", self.timeout_secs, async {
            redis.llen::<_, usize>(key).await
        })
        .await
    }
}

#[async_trait]
impl PipelineStore for RedisStore {
    async fn enqueue_processing(&self, room: &str, seed: &BattleState) -> ReporterResult<bool> {
        let seed_json = serde_json::to_string(seed)?;
        let mut redis = self.redis.clone();
        let added: i64 = with_redis_timeout("enqueue_processing_script", self.timeout_secs, async {
            self.scripts
                .enqueue_processing
                .key(self.keys.processing_set())
                .key(self.keys.processing_queue())
                .key(self.keys.battle_state(room))
                .arg(room)
                .arg(seed_json)
                .arg(BATTLE_STATE_EXPIRE)
                .invoke_async(&mut redis)
                .await
        })
        .await?;
        Ok(added == 1)
    }

    async fn next_to_process(&self, blocking: bool) -> ReporterResult<Option<String>> {
        self.rotate(&self.keys.processing_queue(), blocking).await
    }

    async fn processing_len(&self) -> ReporterResult<usize> {
        self.len(&self.keys.processing_queue()).await
    }

    async fn load_state(&self, room: &str) -> ReporterResult<Option<BattleState>> {
        let key = self.keys.battle_state(room);
        let mut redis = self.redis.clone();
        let raw = with_redis_timeout("get_battle_state", self.timeout_secs, async {
            redis.get::<_, Option<String>>(&key).await
        })
        .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: &BattleState) -> ReporterResult<()> {
        let key = self.keys.battle_state(&state.room);
        let json = serde_json::to_string(state)?;
        let mut redis = self.redis.clone();
        with_redis_timeout("set_battle_state", self.timeout_secs, async {
            redis
                .set_ex::<_, _, ()>(&key, json, BATTLE_STATE_EXPIRE)
                .await
        })
        .await
    }

    async fn finish_processing(
        &self,
        room: &str,
        result: Option<&FinishedBattle>,
    ) -> ReporterResult<()> {
        let (payload, end_tick) = match result {
            Some(battle) => (
                serde_json::to_string(battle)?,
                battle.latest_hostility_tick,
            ),
            None => (String::new(), 0),
        };
        let mut redis = self.redis.clone();
        let reported: i64 =
            with_redis_timeout("finish_processing_script", self.timeout_secs, async {
                self.scripts
                    .finish_processing
                    .key(self.keys.processing_queue())
                    .key(self.keys.processing_set())
                    .key(self.keys.battle_state(room))
                    .key(self.keys.reporting_queue())
                    .key(self.keys.last_battle_end(room))
                    .arg(room)
                    .arg(payload)
                    .arg(end_tick)
                    .arg(LAST_BATTLE_END_EXPIRE)
                    .invoke_async(&mut redis)
                    .await
            })
            .await?;
        debug!("Finished processing {} (reported: {})", room, reported == 1);
        Ok(())
    }

    async fn next_to_report(&self, blocking: bool) -> ReporterResult<Option<ReportEntry>> {
        let token = self.rotate(&self.keys.reporting_queue(), blocking).await?;
        Ok(token.map(|token| ReportEntry { token }))
    }

    async fn ack_report(&self, token: &str) -> ReporterResult<bool> {
        self.remove_last(&self.keys.reporting_queue(), token).await
    }

    async fn reporting_len(&self) -> ReporterResult<usize> {
        self.len(&self.keys.reporting_queue()).await
    }

    async fn requeue_for_delivery(
        &self,
        token: &str,
        payloads: &[(Channel, String)],
    ) -> ReporterResult<bool> {
        let mut invocation = self.scripts.requeue_for_delivery.prepare_invoke();
        invocation.key(self.keys.reporting_queue());
        invocation.arg(token);
        for (channel, payload) in payloads {
            invocation.key(self.keys.delivery_queue(*channel));
            invocation.arg(payload.as_str());
        }

        let mut redis = self.redis.clone();
        let removed: i64 =
            with_redis_timeout("requeue_for_delivery_script", self.timeout_secs, async {
                invocation.invoke_async(&mut redis).await
            })
            .await?;
        if removed == 0 {
            warn!("Reporting token was no longer queued; nothing pushed for delivery");
        }
        Ok(removed > 0)
    }

    async fn pull_deliverable(&self, channel: Channel) -> ReporterResult<Option<String>> {
        self.rotate(&self.keys.delivery_queue(channel), false).await
    }

    async fn ack_deliverable(&self, channel: Channel, payload: &str) -> ReporterResult<bool> {
        self.remove_last(&self.keys.delivery_queue(channel), payload)
            .await
    }

    async fn delivery_len(&self, channel: Channel) -> ReporterResult<usize> {
        self.len(&self.keys.delivery_queue(channel)).await
    }

    async fn merge_queue(&self, channel: Channel, separator: &str) -> ReporterResult<usize> {
        let mut redis = self.redis.clone();
        let merged: i64 = with_redis_timeout("merge_queue_script", self.timeout_secs, async {
            self.scripts
                .merge_queue
                .key(self.keys.delivery_queue(channel))
                .arg(separator)
                .invoke_async(&mut redis)
                .await
        })
        .await?;
        Ok(merged.max(0) as usize)
    }

    async fn latest_tick(&self) -> ReporterResult<Option<Tick>> {
        let key = self.keys.latest_tick();
        let mut redis = self.redis.clone();
        with_redis_timeout("get_latest_tick", self.timeout_secs, async {
            redis.get::<_, Option<Tick>>(&key).await
        })
        .await
    }

    async fn set_latest_tick(&self, tick: Tick) -> ReporterResult<()> {
        let key = self.keys.latest_tick();
        let mut redis = self.redis.clone();
        with_redis_timeout("set_latest_tick", self.timeout_secs, async {
            redis
                .set_ex::<_, _, ()>(&key, tick, LATEST_TICK_EXPIRE)
                .await
        })
        .await
    }

    async fn last_battle_end(&self, room: &str) -> ReporterResult<Option<Tick>> {
        let key = self.keys.last_battle_end(room);
        let mut redis = self.redis.clone();
        with_redis_timeout("get_last_battle_end", self.timeout_secs, async {
            redis.get::<_, Option<Tick>>(&key).await
        })
        .await
    }
}
