use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{
    delivery::Channel,
    errors::ReporterResult,
    model::{BattleState, FinishedBattle, Tick},
    pipeline::{PipelineStore, ReportEntry},
};

/// In-process [`PipelineStore`] with the same list semantics as the Redis
/// one: pushes go to the front, consumers rotate the back item to the front,
/// acks remove the occurrence nearest the back. Nothing expires.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
}

#[derive(Default)]
struct Inner {
    processing: VecDeque<String>,
    processing_set: HashSet<String>,
    states: HashMap<String, String>,
    reporting: VecDeque<String>,
    delivery: HashMap<Channel, VecDeque<String>>,
    latest_tick: Option<Tick>,
    last_battle_end: HashMap<String, Tick>,
}

fn rotate(list: &mut VecDeque<String>) -> Option<String> {
    let item = list.pop_back()?;
    list.push_front(item.clone());
    Some(item)
}

fn remove_last(list: &mut VecDeque<String>, value: &str) -> bool {
    match list.iter().rposition(|item| item == value) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processing queue contents, head first.
    pub async fn processing_rooms(&self) -> Vec<String> {
        self.inner.lock().await.processing.iter().cloned().collect()
    }

    pub async fn reporting_payloads(&self) -> Vec<String> {
        self.inner.lock().await.reporting.iter().cloned().collect()
    }

    pub async fn delivery_payloads(&self, channel: Channel) -> Vec<String> {
        self.inner
            .lock()
            .await
            .delivery
            .get(&channel)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pushes a raw payload onto the reporting queue, bypassing processing.
    pub async fn push_report(&self, payload: &str) {
        self.inner
            .lock()
            .await
            .reporting
            .push_front(payload.to_string());
        self.pushed.notify_waiters();
    }

    /// Forgets a room's state, as an expiry would.
    pub async fn evict_state(&self, room: &str) {
        self.inner.lock().await.states.remove(room);
    }

    async fn rotate_processing(&self) -> Option<String> {
        rotate(&mut self.inner.lock().await.processing)
    }

    async fn rotate_reporting(&self) -> Option<String> {
        rotate(&mut self.inner.lock().await.reporting)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn enqueue_processing(&self, room: &str, seed: &BattleState) -> ReporterResult<bool> {
        let seed_json = serde_json::to_string(seed)?;
        let mut inner = self.inner.lock().await;
        if !inner.processing_set.insert(room.to_string()) {
            return Ok(false);
        }
        inner.processing.push_front(room.to_string());
        inner.states.insert(room.to_string(), seed_json);
        drop(inner);
        self.pushed.notify_waiters();
        Ok(true)
    }

    async fn next_to_process(&self, blocking: bool) -> ReporterResult<Option<String>> {
        loop {
            let notified = self.pushed.notified();
            if let Some(room) = self.rotate_processing().await {
                return Ok(Some(room));
            }
            if !blocking {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn processing_len(&self) -> ReporterResult<usize> {
        Ok(self.inner.lock().await.processing.len())
    }

    async fn load_state(&self, room: &str) -> ReporterResult<Option<BattleState>> {
        let inner = self.inner.lock().await;
        match inner.states.get(room) {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    async fn save_state(&self, state: &BattleState) -> ReporterResult<()> {
        let json = serde_json::to_string(state)?;
        self.inner
            .lock()
            .await
            .states
            .insert(state.room.clone(), json);
        Ok(())
    }

    async fn finish_processing(
        &self,
        room: &str,
        result: Option<&FinishedBattle>,
    ) -> ReporterResult<()> {
        let payload = result.map(serde_json::to_string).transpose()?;
        let mut inner = self.inner.lock().await;
        remove_last(&mut inner.processing, room);
        inner.processing_set.remove(room);
        inner.states.remove(room);
        if let (Some(payload), Some(battle)) = (payload, result) {
            inner.reporting.push_front(payload);
            inner
                .last_battle_end
                .insert(room.to_string(), battle.latest_hostility_tick);
            drop(inner);
            self.pushed.notify_waiters();
        }
        Ok(())
    }

    async fn next_to_report(&self, blocking: bool) -> ReporterResult<Option<ReportEntry>> {
        loop {
            let notified = self.pushed.notified();
            if let Some(token) = self.rotate_reporting().await {
                return Ok(Some(ReportEntry { token }));
            }
            if !blocking {
                return Ok(None);
            }
            notified.await;
        }
    }

    async fn ack_report(&self, token: &str) -> ReporterResult<bool> {
        Ok(remove_last(&mut self.inner.lock().await.reporting, token))
    }

    async fn reporting_len(&self) -> ReporterResult<usize> {
        Ok(self.inner.lock().await.reporting.len())
    }

    async fn requeue_for_delivery(
        &self,
        token: &str,
        payloads: &[(Channel, String)],
    ) -> ReporterResult<bool> {
        let mut inner = self.inner.lock().await;
        if !remove_last(&mut inner.reporting, token) {
            return Ok(false);
        }
        for (channel, payload) in payloads {
            inner
                .delivery
                .entry(*channel)
                .or_default()
                .push_front(payload.clone());
        }
        Ok(true)
    }

    async fn pull_deliverable(&self, channel: Channel) -> ReporterResult<Option<String>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.delivery.get_mut(&channel).and_then(rotate))
    }

    async fn ack_deliverable(&self, channel: Channel, payload: &str) -> ReporterResult<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .delivery
            .get_mut(&channel)
            .map(|queue| remove_last(queue, payload))
            .unwrap_or(false))
    }

    async fn delivery_len(&self, channel: Channel) -> ReporterResult<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.delivery.get(&channel).map(VecDeque::len).unwrap_or(0))
    }

    async fn merge_queue(&self, channel: Channel, separator: &str) -> ReporterResult<usize> {
        let mut inner = self.inner.lock().await;
        let Some(queue) = inner.delivery.get_mut(&channel) else {
            return Ok(0);
        };
        let count = queue.len();
        if count < 2 {
            return Ok(count);
        }
        // oldest payload is at the back
        let merged = queue
            .iter()
            .rev()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(separator);
        queue.clear();
        queue.push_front(merged);
        Ok(count)
    }

    async fn latest_tick(&self) -> ReporterResult<Option<Tick>> {
        Ok(self.inner.lock().await.latest_tick)
    }

    async fn set_latest_tick(&self, tick: Tick) -> ReporterResult<()> {
        self.inner.lock().await.latest_tick = Some(tick);
        Ok(())
    }

    async fn last_battle_end(&self, room: &str) -> ReporterResult<Option<Tick>> {
        Ok(self.inner.lock().await.last_battle_end.get(room).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rotation_keeps_items_queued() {
        let store = MemoryStore::new();
        for room in ["A", "B", "C"] {
            store
                .enqueue_processing(room, &BattleState::seed(room, 1000, 120))
                .await
                .unwrap();
        }
        assert_eq!(store.next_to_process(false).await.unwrap().as_deref(), Some("A"));
        assert_eq!(store.next_to_process(false).await.unwrap().as_deref(), Some("B"));
        assert_eq!(store.next_to_process(false).await.unwrap().as_deref(), Some("C"));
        assert_eq!(store.next_to_process(false).await.unwrap().as_deref(), Some("A"));
        assert_eq!(store.processing_len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn merge_joins_oldest_first() {
        let store = MemoryStore::new();
        store.push_report("t").await;
        store
            .requeue_for_delivery(
                "t",
                &[
                    (Channel::Slack, "first".to_string()),
                    (Channel::Cli, "cli".to_string()),
                ],
            )
            .await
            .unwrap();
        store.push_report("u").await;
        store
            .requeue_for_delivery("u", &[(Channel::Slack, "second".to_string())])
            .await
            .unwrap();

        assert_eq!(store.merge_queue(Channel::Slack, "\n").await.unwrap(), 2);
        assert_eq!(
            store.delivery_payloads(Channel::Slack).await,
            vec!["first\nsecond".to_string()]
        );
        assert_eq!(store.delivery_len(Channel::Cli).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blocking_pull_parks_until_a_room_arrives() {
        let store = MemoryStore::new();
        let mut pull = tokio_test::task::spawn(store.next_to_process(true));
        tokio_test::assert_pending!(pull.poll());

        store
            .enqueue_processing("W1N1", &BattleState::seed("W1N1", 40, 120))
            .await
            .unwrap();
        assert!(pull.is_woken());
        let room = tokio_test::assert_ready_ok!(pull.poll());
        assert_eq!(room.as_deref(), Some("W1N1"));
    }
}
