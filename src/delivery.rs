use std::fmt;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::{
    errors::ReporterResult,
    metrics::{DELIVERY_FAILED_TOTAL, DELIVERY_SENT_TOTAL},
    pipeline::{DrainCursor, PipelineStore},
};

/// Notification channels a finished battle can be fanned out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Cli,
    Slack,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Cli => "cli",
            Channel::Slack => "slack",
        }
    }

    /// Batched channels merge their whole queue into one message per drain.
    pub fn batched(&self) -> bool {
        matches!(self, Channel::Slack)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sends one formatted message. Failures are reported, never raised: the
/// message stays queued and is retried on the next drain.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(&self, message: &str) -> bool;
}

/// Writes reports to the log.
#[derive(Debug, Default, Clone)]
pub struct CliAdapter;

#[async_trait]
impl DeliveryAdapter for CliAdapter {
    fn channel(&self) -> Channel {
        Channel::Cli
    }

    async fn send(&self, message: &str) -> bool {
        info!("{}", message);
        true
    }
}

/// Posts reports to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackWebhookAdapter {
    http_client: reqwest::Client,
    webhook_url: String,
}

impl SlackWebhookAdapter {
    pub fn new(http_client: reqwest::Client, webhook_url: impl Into<String>) -> Self {
        Self {
            http_client,
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl DeliveryAdapter for SlackWebhookAdapter {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    async fn send(&self, message: &str) -> bool {
        let body = json!({ "text": message });
        match self
            .http_client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                warn!("Slack webhook rejected message: {} ({})", text, status);
                false
            }
            Err(e) => {
                warn!("Slack webhook request failed: {}", e);
                false
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: usize,
    pub failed: usize,
}

/// One pass over a channel's delivery queue. Sent messages are acked; failed
/// ones stay queued for the next pass.
pub async fn deliver_pending_once(
    store: &dyn PipelineStore,
    adapter: &dyn DeliveryAdapter,
    batch_separator: &str,
) -> ReporterResult<DeliveryStats> {
    let channel = adapter.channel();
    if channel.batched() {
        let merged = store.merge_queue(channel, batch_separator).await?;
        if merged > 1 {
            debug!("Merged {} queued {} messages into one", merged, channel);
        }
    }

    let mut stats = DeliveryStats::default();
    let mut cursor = DrainCursor::new(store.delivery_len(channel).await?);
    while cursor.has_budget() {
        let Some(message) = store.pull_deliverable(channel).await? else {
            break;
        };
        if !cursor.admit(&message) {
            break;
        }

        if adapter.send(&message).await {
            DELIVERY_SENT_TOTAL.with_label_values(&[channel.as_str()]).inc();
            stats.sent += 1;
            if let Err(e) = store.ack_deliverable(channel, &message).await {
                error!("{} message sent but not acked, it will be sent again: {}", channel, e);
                cursor.kept(&message);
            }
        } else {
            cursor.kept(&message);
            DELIVERY_FAILED_TOTAL
                .with_label_values(&[channel.as_str()])
                .inc();
            stats.failed += 1;
        }
    }

    if stats.failed > 0 {
        warn!(
            "{} delivery pass: {} sent, {} left queued after failing",
            channel, stats.sent, stats.failed
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::MemoryStore;

    struct Flaky {
        reject: &'static str,
    }

    #[async_trait]
    impl DeliveryAdapter for Flaky {
        fn channel(&self) -> Channel {
            Channel::Cli
        }

        async fn send(&self, message: &str) -> bool {
            message != self.reject
        }
    }

    async fn queue(store: &MemoryStore, channel: Channel, messages: &[&str]) {
        for (i, message) in messages.iter().enumerate() {
            let token = format!("token-{}", i);
            store.push_report(&token).await;
            store
                .requeue_for_delivery(&token, &[(channel, message.to_string())])
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn failed_messages_stay_queued_and_pass_terminates() {
        let store = MemoryStore::new();
        queue(&store, Channel::Cli, &["one", "bad", "three"]).await;

        let stats = deliver_pending_once(&store, &Flaky { reject: "bad" }, "\n")
            .await
            .unwrap();
        assert_eq!(stats, DeliveryStats { sent: 2, failed: 1 });
        assert_eq!(store.delivery_payloads(Channel::Cli).await, vec!["bad"]);

        let again = deliver_pending_once(&store, &Flaky { reject: "bad" }, "\n")
            .await
            .unwrap();
        assert_eq!(again, DeliveryStats { sent: 0, failed: 1 });
    }

    #[test]
    fn only_slack_is_batched() {
        assert!(Channel::Slack.batched());
        assert!(!Channel::Cli.batched());
        assert_eq!(Channel::Slack.to_string(), "slack");
    }
}
