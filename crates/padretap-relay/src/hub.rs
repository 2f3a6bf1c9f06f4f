//! In-memory subscriber registry and broadcast.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::join_all;
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use padretap_core::{Config, EventEnvelope, TargetFilter};

/// Identifier assigned to each connected subscriber.
pub type SubscriberId = u64;

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the message was queued for.
    pub delivered: usize,
    /// Subscribers removed because their queue was closed.
    pub failed: usize,
    /// The relay-side filter dropped the message before broadcast.
    pub filtered: bool,
}

/// Thread-safe set of live subscribers.
///
/// Every message received from any subscriber is queued, unchanged, to every
/// subscriber including the sender. Each subscriber has a bounded outbound
/// queue; a full queue delays the broadcast until it drains, a closed one
/// drops that subscriber without affecting delivery to the others.
#[derive(Clone)]
pub struct RelayHub {
    subscribers: Arc<RwLock<HashMap<SubscriberId, mpsc::Sender<Message>>>>,
    next_id: Arc<AtomicU64>,
    filter: Option<Arc<TargetFilter>>,
    queue: usize,
}

impl RelayHub {
    pub fn new(config: &Config) -> Self {
        let filter = config.relay.relay_filter.then(|| {
            let filter = TargetFilter::from_config(&config.filter);
            info!(
                targets = config.filter.targets.len(),
                filter_only = filter.filter_only_targets(),
                "Relay-side filtering enabled"
            );
            Arc::new(filter)
        });
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            filter,
            queue: config.relay.subscriber_queue.max(1),
        }
    }

    /// Register a new subscriber and return its id and outbound queue.
    pub async fn on_connect(&self) -> (SubscriberId, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(self.queue);
        let id = self.register(tx).await;
        (id, rx)
    }

    async fn register(&self, tx: mpsc::Sender<Message>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let count = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(id, tx);
            subscribers.len()
        };
        info!(subscriber = id, count, "Subscriber connected");
        id
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub async fn on_disconnect(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            info!(subscriber = id, "Subscriber disconnected");
        }
        removed
    }

    /// Broadcast one message from `sender` to every subscriber.
    pub async fn on_message(&self, sender: SubscriberId, message: Message) -> BroadcastReport {
        if !self.passes_filter(&message) {
            debug!(sender, "Relay filter dropped message");
            return BroadcastReport {
                filtered: true,
                ..BroadcastReport::default()
            };
        }

        // Snapshot under the read lock; the lock is released before any send
        // can suspend.
        let snapshot: Vec<(SubscriberId, mpsc::Sender<Message>)> = self
            .subscribers
            .read()
            .await
            .iter()
            .map(|(&id, tx)| (id, tx.clone()))
            .collect();

        let sends = snapshot.iter().map(|(id, tx)| {
            let message = message.clone();
            async move { (*id, tx.send(message).await.is_ok()) }
        });
        let outcomes = join_all(sends).await;

        let mut report = BroadcastReport::default();
        let failed: Vec<SubscriberId> = outcomes
            .into_iter()
            .filter_map(|(id, ok)| {
                if ok {
                    report.delivered += 1;
                    None
                } else {
                    Some(id)
                }
            })
            .collect();

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in &failed {
                if subscribers.remove(id).is_some() {
                    warn!(subscriber = id, "Send failed, subscriber removed");
                }
            }
            report.failed = failed.len();
        }

        debug!(sender, delivered = report.delivered, "Broadcast");
        report
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Envelopes that the filter rejects are dropped; anything that is not an
    /// envelope passes through.
    fn passes_filter(&self, message: &Message) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        let Message::Text(text) = message else {
            return true;
        };
        EventEnvelope::parse(text.as_str())
            .is_none_or(|envelope| filter.evaluate(&envelope.event).is_some())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use padretap_core::MatchStrategy;
    use padretap_core::config::FilterConfig;

    use super::*;

    fn hub() -> RelayHub {
        RelayHub::new(&Config::default())
    }

    fn filtering_hub() -> RelayHub {
        let mut config = Config::default();
        config.relay.relay_filter = true;
        config.filter = FilterConfig::new("alice", true, MatchStrategy::Structured);
        RelayHub::new(&config)
    }

    fn envelope_text(name: &str) -> Message {
        let envelope = EventEnvelope::new(json!({"user": {"screen_name": name}}), false);
        Message::text(envelope.to_json().unwrap())
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_including_sender() {
        let hub = hub();
        let (a, mut rx_a) = hub.on_connect().await;
        let (_b, mut rx_b) = hub.on_connect().await;

        let report = hub.on_message(a, Message::text("hello")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.recv().await, Some(Message::text("hello")));
        assert_eq!(rx_b.recv().await, Some(Message::text("hello")));
    }

    #[tokio::test]
    async fn failed_subscriber_is_removed_without_affecting_others() {
        let hub = hub();
        let (a, mut rx_a) = hub.on_connect().await;
        let (b, rx_b) = hub.on_connect().await;
        let (_c, mut rx_c) = hub.on_connect().await;
        drop(rx_b);

        let report = hub.on_message(a, Message::text("x")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(rx_a.recv().await, Some(Message::text("x")));
        assert_eq!(rx_c.recv().await, Some(Message::text("x")));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());

        assert_eq!(hub.subscriber_count().await, 2);
        assert!(!hub.on_disconnect(b).await);
    }

    #[tokio::test]
    async fn slow_subscriber_delays_but_still_receives() {
        let mut config = Config::default();
        config.relay.subscriber_queue = 1;
        let hub = RelayHub::new(&config);
        let (a, mut rx_a) = hub.on_connect().await;
        let (_slow, mut rx_slow) = hub.on_connect().await;

        assert_eq!(hub.on_message(a, Message::text("1")).await.delivered, 2);
        rx_a.recv().await.unwrap();

        let pending = {
            let hub = hub.clone();
            tokio::spawn(async move { hub.on_message(a, Message::text("2")).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        assert_eq!(rx_slow.recv().await, Some(Message::text("1")));
        let report = pending.await.unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(rx_slow.recv().await, Some(Message::text("2")));
        assert_eq!(hub.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let hub = hub();
        let (id, _rx) = hub.on_connect().await;
        assert_eq!(hub.subscriber_count().await, 1);
        assert!(hub.on_disconnect(id).await);
        assert!(!hub.on_disconnect(id).await);
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_with_no_subscribers_is_noop() {
        let hub = hub();
        assert_eq!(
            hub.on_message(42, Message::text("x")).await,
            BroadcastReport::default()
        );
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let hub = hub();
        let (a, _ra) = hub.on_connect().await;
        let (b, _rb) = hub.on_connect().await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn relay_filter_drops_non_target_envelopes() {
        let hub = filtering_hub();
        let (a, mut rx) = hub.on_connect().await;

        assert!(hub.on_message(a, envelope_text("bob")).await.filtered);
        assert!(rx.try_recv().is_err());

        let report = hub.on_message(a, envelope_text("Alice")).await;
        assert!(!report.filtered);
        assert_eq!(report.delivered, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn relay_filter_passes_non_envelopes() {
        let hub = filtering_hub();
        let (a, mut rx) = hub.on_connect().await;

        let notice = r#"{"message":"SYSTEM ONLINE","timestamp":1}"#;
        assert_eq!(hub.on_message(a, Message::text(notice)).await.delivered, 1);
        assert_eq!(
            hub.on_message(a, Message::binary(vec![1, 2, 3])).await.delivered,
            1
        );
        assert_eq!(rx.recv().await, Some(Message::text(notice)));
    }
}
