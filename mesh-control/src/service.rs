//! Control plane dispatch (spec §4.11): one subscription, topic-encoded
//! HTTP-like intent, JSON-RPC-over-topic request/response.
//!
//! Grounded on `mesh_gateway::bridge`'s internal-queue-plus-ack/nack-with-
//! backoff loop, retargeted from gateway response correlation to REST-style
//! CRUD over an [`AppRegistry`].

use std::sync::Arc;
use std::time::Duration;

use a2a_protocol::topics::{self, Namespace};
use a2a_protocol::wire::{ErrorCode, JSONRPCError};
use a2a_protocol::{JsonRpcRequest, JsonRpcResponse, UserProperties};
use mesh_broker::{BrokerClient, BrokerError, BrokerMessage};
use mesh_config::middleware::config_resolver;
use mesh_core::app::ManagementError;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::registry::{AppFactory, AppRegistry};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("malformed json-rpc payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),
}

pub struct ControlPlaneService {
    pub namespace: Namespace,
    pub apps: Arc<AppRegistry>,
    pub factory: Arc<dyn AppFactory>,
    pub broker: Arc<dyn BrokerClient>,
    /// Backoff applied after a nack (spec §5: "components MUST NOT perform
    /// blocking IO on the broker-callback thread"; this sleep runs on the
    /// loop's own task, not the callback).
    pub nack_backoff: Duration,
}

/// Drains `queue` until it closes, dispatching each control-plane request
/// and ack'ing/nack'ing per the same policy as the gateway bridge loop.
pub async fn run_control_loop(service: Arc<ControlPlaneService>, mut queue: mpsc::Receiver<BrokerMessage>) {
    while let Some(msg) = queue.recv().await {
        metrics::counter!(mesh_config::metrics_init::names::EVENTS_RECEIVED, "topic" => msg.topic.clone()).increment(1);
        match dispatch_message(&service, &msg).await {
            Ok(()) => msg.ack(),
            Err(e) => {
                tracing::warn!(topic = %msg.topic, error = %e, "control-plane dispatch failed, nacking");
                msg.nack();
                tokio::time::sleep(service.nack_backoff).await;
            }
        }
    }
}

/// Subscribes `{ns}sam/v1/control/>`, copies matching messages into a
/// bounded internal queue, and spawns [`run_control_loop`] to drain it.
pub async fn spawn_control_plane(
    service: Arc<ControlPlaneService>,
    queue_capacity: usize,
) -> Result<tokio::task::JoinHandle<()>, BrokerError> {
    let pattern = topics::control_plane_subscription(&service.namespace);
    let mut stream = service.broker.subscribe(&pattern).await?;
    let (tx, rx) = mpsc::channel(queue_capacity);
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            if tx.send(msg).await.is_err() {
                break;
            }
        }
    });
    Ok(tokio::spawn(run_control_loop(service, rx)))
}

async fn dispatch_message(service: &ControlPlaneService, msg: &BrokerMessage) -> Result<(), ControlError> {
    let Some((method, path)) = parse_control_topic(&service.namespace, &msg.topic) else {
        // Not a well-formed `apps` intent under our subscription; ignore.
        return Ok(());
    };

    let request: JsonRpcRequest = serde_json::from_slice(&msg.payload)?;
    let user_config = msg.user_properties.a2a_user_config.clone().unwrap_or(Value::Null);
    let body = request.params.clone().unwrap_or(Value::Null);

    let result = service.handle(&method, &path, body, &user_config).await;
    let envelope = match result {
        Ok(value) => JsonRpcResponse::success(request.id.clone(), value),
        Err(err) => JsonRpcResponse::error(request.id.clone(), err),
    };

    match &msg.user_properties.reply_to {
        None => {
            tracing::warn!(topic = %msg.topic, "control-plane request has no replyTo; dropping response");
        }
        Some(reply_to) => {
            let payload = serde_json::to_vec(&envelope).unwrap_or_default();
            service.broker.publish(reply_to, payload, UserProperties::default()).await?;
        }
    }
    Ok(())
}

/// Strips the `{ns}sam/v1/control/` prefix and splits the residue into
/// `(method, ["apps", name?, custom…])`, returning `None` unless the
/// resource segment is literally `apps`.
fn parse_control_topic(ns: &Namespace, topic: &str) -> Option<(String, Vec<String>)> {
    let prefix = format!("{}sam/v1/control/", ns.as_str());
    let residue = topic.strip_prefix(prefix.as_str())?;
    let mut segments = residue.split('/').map(str::to_string);
    let method = segments.next()?;
    let resource = segments.next()?;
    if resource != "apps" {
        return None;
    }
    Some((method, segments.collect()))
}

fn not_found(name: &str) -> JSONRPCError {
    JSONRPCError::new(ErrorCode::NotFound, format!("no such app: {name}"))
}

impl ControlPlaneService {
    async fn handle(&self, method: &str, path: &[String], body: Value, user_config: &Value) -> Result<Value, JSONRPCError> {
        let app_name = path.first().cloned();
        let custom_path = if path.len() > 1 { Some(path[1..].join("/")) } else { None };

        let operation = serde_json::json!({
            "operation_type": "control_plane_access",
            "method": method,
            "app_name": app_name,
            "custom_path": custom_path,
        });
        let scope = app_name.clone().unwrap_or_else(|| "control_service".to_string());
        if !config_resolver().authorize_operation(&scope, user_config, &operation).await {
            return Err(JSONRPCError::new(ErrorCode::AuthDenied, "control-plane operation denied"));
        }

        match path {
            [] => self.handle_collection(method, body).await,
            [name] => self.handle_single(method, name, body).await,
            [name, rest @ ..] => self.handle_custom(method, name, &rest.join("/"), body).await,
        }
    }

    async fn handle_collection(&self, method: &str, body: Value) -> Result<Value, JSONRPCError> {
        match method {
            "get" => {
                let infos = self.apps.list_info().await;
                Ok(serde_json::to_value(infos).unwrap())
            }
            "post" => {
                let name = body
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| JSONRPCError::new(ErrorCode::InvalidRequest, "missing required field 'name'"))?
                    .to_string();
                if self.apps.contains(&name) {
                    return Err(JSONRPCError::new(ErrorCode::Conflict, format!("app {name} already exists")));
                }
                let app = self
                    .factory
                    .create(&name, body, self.broker.clone())
                    .await
                    .map_err(|e| JSONRPCError::new(ErrorCode::InvalidRequest, e.to_string()))?;
                app.start().await;
                let info = app.get_info().await;
                self.apps.insert(name, app);
                Ok(serde_json::to_value(info).unwrap())
            }
            other => Err(JSONRPCError::new(ErrorCode::MethodNotAllowed, format!("unsupported method {other} on apps collection"))),
        }
    }

    async fn handle_single(&self, method: &str, name: &str, body: Value) -> Result<Value, JSONRPCError> {
        match method {
            "get" => {
                let app = self.apps.get(name).ok_or_else(|| not_found(name))?;
                let mut info = serde_json::to_value(app.get_info().await).unwrap();
                if let Value::Object(map) = &mut info {
                    map.insert("management_endpoints".to_string(), serde_json::json!(["status"]));
                }
                Ok(info)
            }
            "put" => {
                let existing = self.apps.get(name).ok_or_else(|| not_found(name))?;
                existing.stop().await;
                let app = self
                    .factory
                    .create(name, body, self.broker.clone())
                    .await
                    .map_err(|e| JSONRPCError::new(ErrorCode::InvalidRequest, e.to_string()))?;
                app.start().await;
                let info = app.get_info().await;
                self.apps.insert(name.to_string(), app);
                Ok(serde_json::to_value(info).unwrap())
            }
            "patch" => {
                let app = self.apps.get(name).ok_or_else(|| not_found(name))?;
                if let Some(enabled) = body.get("enabled").and_then(Value::as_bool) {
                    app.set_enabled(enabled);
                    if enabled {
                        app.start().await;
                    } else {
                        app.stop().await;
                    }
                }
                Ok(serde_json::to_value(app.get_info().await).unwrap())
            }
            "delete" => {
                let app = self.apps.remove(name).ok_or_else(|| not_found(name))?;
                app.stop().await;
                Ok(serde_json::json!({"deleted": name}))
            }
            other => Err(JSONRPCError::new(ErrorCode::MethodNotAllowed, format!("unsupported method {other} on apps/{name}"))),
        }
    }

    async fn handle_custom(&self, method: &str, name: &str, custom_path: &str, body: Value) -> Result<Value, JSONRPCError> {
        let app = self.apps.get(name).ok_or_else(|| not_found(name))?;
        let body = if body.is_null() { None } else { Some(body) };
        app.handle_management_request(method, custom_path, body)
            .await
            .map_err(|e| match e {
                ManagementError::NotFound => JSONRPCError::new(ErrorCode::NotFound, e.to_string()),
            })
    }
}
