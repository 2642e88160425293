//! In-process dev-mode broker: always connected, delivers by iterating
//! subscriptions and wildcard-matching each publish against every pattern.
//!
//! Grounded on `loom::channels::named_barrier`'s style of a small
//! concurrency-safe registry guarded by `dashmap`, which the teacher already
//! depends on (`loom/Cargo.toml`).

use crate::client::{BrokerClient, BrokerError, MessageStream};
use crate::message::BrokerMessage;
use a2a_protocol::topics::topic_matches_subscription;
use a2a_protocol::UserProperties;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

struct Subscription {
    pattern: String,
    sender: mpsc::UnboundedSender<BrokerMessage>,
}

/// In-process broker for local dev/test: no network, no persistence, always
/// `is_connected() == true` (spec §4.2: "dev mode implementation is
/// in-process and always reports connected").
pub struct DevBroker {
    subscriptions: DashMap<u64, Subscription>,
    next_id: AtomicU64,
}

impl Default for DevBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl DevBroker {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Number of live subscriptions; exposed for tests asserting cleanup.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[async_trait]
impl BrokerClient for DevBroker {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        user_properties: UserProperties,
    ) -> Result<(), BrokerError> {
        let mut dead: Vec<u64> = Vec::new();
        for entry in self.subscriptions.iter() {
            if !topic_matches_subscription(topic, &entry.value().pattern) {
                continue;
            }
            let msg = BrokerMessage::detached(topic.to_string(), payload.clone(), user_properties.clone());
            if entry.value().sender.send(msg).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.subscriptions.remove(&id);
        }
        Ok(())
    }

    async fn subscribe(&self, topic_pattern: &str) -> Result<MessageStream, BrokerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.insert(
            id,
            Subscription {
                pattern: topic_pattern.to_string(),
                sender: tx,
            },
        );
        Ok(UnboundedReceiverStream::new(rx))
    }

    async fn bind_queue(&self, _queue_name: &str, _durable: bool) -> Result<(), BrokerError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }
}
