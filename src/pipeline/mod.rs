//! Durable queues between the pipeline stages.
//!
//! Three roles share one store:
//! - *processing*: room names awaiting reconciliation, with a membership set
//!   so a room is never queued twice, plus each room's [`BattleState`];
//! - *reporting*: serialized [`FinishedBattle`] payloads;
//! - *delivery*: one queue of formatted messages per [`Channel`].
//!
//! Consumers never pop. They rotate the next item to the other end of its
//! list and only remove it with an explicit ack, so a worker dying between
//! two steps leaves the item queued for the next pass.

use std::future::Future;

use async_trait::async_trait;
use tokio::time::{timeout, Duration};
use tracing::error;

use crate::delivery::Channel;
use crate::errors::{ReporterError, ReporterResult};
use crate::model::{BattleState, FinishedBattle, Tick};

pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod scripts;

pub use keys::KeyScheme;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// A reporting queue item. The token is the exact stored payload and is what
/// acks remove, so it must be handed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEntry {
    pub token: String,
}

impl ReportEntry {
    pub fn battle(&self) -> ReporterResult<FinishedBattle> {
        Ok(serde_json::from_str(&self.token)?)
    }
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Queues `room` for processing and stores its seed, unless the room is
    /// already queued. Returns whether the room was added.
    async fn enqueue_processing(&self, room: &str, seed: &BattleState) -> ReporterResult<bool>;

    /// Rotates the next room to the back of the processing queue and returns it.
    /// With `blocking`, waits until a room is available.
    async fn next_to_process(&self, blocking: bool) -> ReporterResult<Option<String>>;

    async fn processing_len(&self) -> ReporterResult<usize>;

    async fn load_state(&self, room: &str) -> ReporterResult<Option<BattleState>>;

    async fn save_state(&self, state: &BattleState) -> ReporterResult<()>;

    /// Removes `room` from processing and drops its state. A finished battle
    /// is pushed to the reporting queue and recorded as the room's last
    /// battle end; `None` drops the room without reporting anything.
    async fn finish_processing(
        &self,
        room: &str,
        result: Option<&FinishedBattle>,
    ) -> ReporterResult<()>;

    async fn next_to_report(&self, blocking: bool) -> ReporterResult<Option<ReportEntry>>;

    /// Removes one occurrence of `token` from the reporting queue.
    async fn ack_report(&self, token: &str) -> ReporterResult<bool>;

    async fn reporting_len(&self) -> ReporterResult<usize>;

    /// Atomically acks `token` and pushes each payload onto its channel queue.
    /// Nothing is pushed, and false returned, if `token` was no longer queued.
    async fn requeue_for_delivery(
        &self,
        token: &str,
        payloads: &[(Channel, String)],
    ) -> ReporterResult<bool>;

    async fn pull_deliverable(&self, channel: Channel) -> ReporterResult<Option<String>>;

    async fn ack_deliverable(&self, channel: Channel, payload: &str) -> ReporterResult<bool>;

    async fn delivery_len(&self, channel: Channel) -> ReporterResult<usize>;

    /// Collapses a channel queue into a single payload joined by `separator`.
    /// Returns how many payloads were merged.
    async fn merge_queue(&self, channel: Channel, separator: &str) -> ReporterResult<usize>;

    async fn latest_tick(&self) -> ReporterResult<Option<Tick>>;

    async fn set_latest_tick(&self, tick: Tick) -> ReporterResult<()>;

    async fn last_battle_end(&self, room: &str) -> ReporterResult<Option<Tick>>;
}

/// Bounds one pass over a rotating queue.
///
/// A pass ends when the queue is empty, when the first item that was put
/// back comes around again, or after as many pulls as the queue held when
/// the pass started. Items that keep failing are therefore seen at most once
/// per pass and the pass always terminates.
#[derive(Debug)]
pub struct DrainCursor {
    first_kept: Option<String>,
    budget: usize,
    pulls: usize,
}

impl DrainCursor {
    pub fn new(queue_len: usize) -> Self {
        Self {
            first_kept: None,
            budget: queue_len,
            pulls: 0,
        }
    }

    /// Whether another pull is allowed.
    pub fn has_budget(&self) -> bool {
        self.pulls < self.budget
    }

    /// Records a pull. Returns false if `item` closes the cycle.
    pub fn admit(&mut self, item: &str) -> bool {
        self.pulls += 1;
        self.first_kept.as_deref() != Some(item)
    }

    /// Marks `item` as left in the queue.
    pub fn kept(&mut self, item: &str) {
        if self.first_kept.is_none() {
            self.first_kept = Some(item.to_string());
        }
    }

    pub fn pulls(&self) -> usize {
        self.pulls
    }
}

pub async fn with_redis_timeout<F, T>(
    operation_name: &str,
    timeout_secs: u64,
    future: F,
) -> ReporterResult<T>
where
    F: Future<Output = Result<T, redis::RedisError>>,
{
    match timeout(Duration::from_secs(timeout_secs), future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(ReporterError::Redis(err)),
        Err(_) => {
            error!(
                "{} timeout after {}s - Redis may be unresponsive",
                operation_name, timeout_secs
            );
            Err(ReporterError::Timeout {
                operation: operation_name.to_string(),
                seconds: timeout_secs,
            })
        }
    }
}
