//! `BrokerClient`: the contract every component consumes (spec §4.2).

use crate::message::BrokerMessage;
use a2a_protocol::UserProperties;
use async_trait::async_trait;
use thiserror::Error;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker not connected")]
    NotConnected,
    #[error("subscription channel closed")]
    SubscriptionClosed,
}

pub type MessageStream = UnboundedReceiverStream<BrokerMessage>;

/// Contract consumed by all components. Ordering: messages on the same
/// subscription are delivered in publish order; no guarantees across
/// subscriptions (spec §4.2).
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Fire-and-forget; must be safe from any thread.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        user_properties: UserProperties,
    ) -> Result<(), BrokerError>;

    /// Yields messages matching `topic_pattern` (may contain `>`/`*` wildcards).
    async fn subscribe(&self, topic_pattern: &str) -> Result<MessageStream, BrokerError>;

    /// Binds this app to a named queue; durable or temporary, chosen by the
    /// App Host. Dev mode treats every binding as equivalent and ignores it.
    async fn bind_queue(&self, queue_name: &str, durable: bool) -> Result<(), BrokerError>;

    /// Authoritative for `App.is_ready()`; a dev-mode broker always reports
    /// `true` (spec §4.2, §4.3).
    fn is_connected(&self) -> bool;
}
