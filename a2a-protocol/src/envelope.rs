//! JSON-RPC 2.0 envelope and broker user-properties, grounded on
//! `stream-event::envelope::{Envelope, EnvelopeState}`: the same
//! "small struct with `inject_into`, never overwrites a present key" shape,
//! retargeted from the stream protocol's session/node/event-id triad to the
//! A2A protocol's `{jsonrpc, id, method|result|error}` shape plus the broker
//! metadata that rides out-of-band in user properties.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC request: `{jsonrpc, id, method, params}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: Some(params),
        }
    }
}

/// A JSON-RPC response: exactly one of `result`/`error` is present. The `id`
/// MUST equal the request's `id` (spec §4.2: "every reply carries the same id").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<crate::wire::JSONRPCError>,
}

impl JsonRpcResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: impl Into<String>, error: crate::wire::JSONRPCError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }
}

/// Broker message metadata that never rides in the JSON-RPC body: routing
/// and authorization context the transport carries alongside the payload.
///
/// Key names are the broker's case-sensitive property names verbatim
/// (spec §6.1): `clientId`, `userId`, `replyTo`, `a2aStatusTopic`, `a2aUserConfig`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProperties {
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(rename = "a2aStatusTopic", skip_serializing_if = "Option::is_none")]
    pub a2a_status_topic: Option<String>,
    #[serde(rename = "a2aUserConfig", skip_serializing_if = "Option::is_none")]
    pub a2a_user_config: Option<Value>,
}

impl UserProperties {
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_status_topic(mut self, topic: impl Into<String>) -> Self {
        self.a2a_status_topic = Some(topic.into());
        self
    }

    /// Merges `self` into `target`, filling only keys `target` doesn't already
    /// have set — mirrors `Envelope::inject_into`'s `entry(..).or_insert_with(..)`
    /// policy of never clobbering a caller-supplied value.
    pub fn inject_into(&self, target: &mut HashMap<String, Value>) {
        let mine = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = mine {
            for (k, v) in map {
                target.entry(k).or_insert(v);
            }
        }
    }
}
