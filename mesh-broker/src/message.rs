//! The message shape every subscriber receives: topic, raw payload, broker
//! user properties, and ack/nack handles.

use a2a_protocol::UserProperties;
use std::sync::Arc;

/// Callback invoked on `ack`/`nack`. Dev mode has no redelivery queue, so the
/// only implementation logs; the handle exists so core code never
/// special-cases the broker implementation (spec §4.2: "blocked handlers
/// must NACK rather than silently drop").
pub type AckCallback = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Clone)]
pub struct BrokerMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub user_properties: UserProperties,
    on_settle: Option<AckCallback>,
}

impl std::fmt::Debug for BrokerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerMessage")
            .field("topic", &self.topic)
            .field("payload_len", &self.payload.len())
            .field("user_properties", &self.user_properties)
            .finish()
    }
}

impl BrokerMessage {
    pub fn new(
        topic: impl Into<String>,
        payload: Vec<u8>,
        user_properties: UserProperties,
        on_settle: AckCallback,
    ) -> Self {
        Self {
            topic: topic.into(),
            payload,
            user_properties,
            on_settle: Some(on_settle),
        }
    }

    /// Builds a message with no ack callback, for tests that construct
    /// messages directly rather than through a [`crate::BrokerClient`].
    pub fn detached(topic: impl Into<String>, payload: Vec<u8>, user_properties: UserProperties) -> Self {
        Self {
            topic: topic.into(),
            payload,
            user_properties,
            on_settle: None,
        }
    }

    pub fn ack(&self) {
        if let Some(cb) = &self.on_settle {
            cb(true);
        }
    }

    pub fn nack(&self) {
        if let Some(cb) = &self.on_settle {
            cb(false);
        }
    }

    pub fn payload_as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.payload)
    }
}
