//! Bridge loop (spec §4.8.2): consumes the internal queue one broker
//! message at a time, dispatches discovery updates to the Agent Registry,
//! parses gateway-owned-subscription traffic as JSON-RPC responses, and
//! forwards the resulting task/status/artifact events to the external
//! transport after artifact-URI and late-phase embed resolution.
//!
//! Grounded on `serve::run::delivery::handle_run_stream`'s event-consume
//! loop, retargeted from a single WebSocket run to a durable per-gateway
//! subscription with ack/nack-with-backoff instead of one-shot streaming.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use a2a_protocol::topics::{self, Namespace};
use a2a_protocol::wire::{
    FileVariant, JSONRPCError, Message, Part, Role, Task, TaskArtifactUpdateEvent, TaskEvent, TaskState,
    TaskStatusPayload, TaskStatusUpdateEvent,
};
use async_trait::async_trait;
use base64::Engine;
use mesh_broker::{BrokerClient, BrokerError, BrokerMessage};
use mesh_core::artifact::{parse_artifact_uri, ArtifactService};
use mesh_core::embed::{resolve_recursive, EmbedRegistry, Phase, Signal};
use mesh_core::registry::{AgentCard, AgentRegistry};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use crate::context_manager::TaskContextManager;

const EMBED_MAX_DEPTH: u32 = 8;
const SIGNAL_SOURCE_KEY: &str = "source";
const SIGNAL_SOURCE_VALUE: &str = "gateway_signal";

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("malformed json-rpc payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("response carries no result and no error")]
    EmptyResult,
    #[error("subscription matched but no task id could be extracted from {0}")]
    MissingTaskId(String),
    #[error("response id {got} does not match the topic's task id {expected}")]
    TaskIdMismatch { expected: String, got: String },
    #[error("failed to deliver event to the external transport: {0}")]
    Outbound(String),
}

/// What the bridge hands to the external transport once an event has been
/// fully resolved; transport-agnostic (spec §4.8: "bridges it to the mesh").
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    Error(JSONRPCError),
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
    Terminal(Task),
}

#[async_trait]
pub trait GatewayOutbound: Send + Sync {
    async fn send_event(&self, task_id: &str, event: OutboundEvent) -> Result<(), String>;
}

pub struct GatewayBridge {
    pub namespace: Namespace,
    pub gateway_id: String,
    pub registry: Arc<AgentRegistry>,
    pub context_manager: Arc<TaskContextManager>,
    pub artifacts: Option<Arc<ArtifactService>>,
    pub embeds: Arc<EmbedRegistry>,
    /// Resolve `artifact://` URIs inside `FilePart`s into inline bytes
    /// before forwarding (spec §4.8.2 step 2a); configurable per gateway.
    pub resolve_artifact_uris: bool,
    pub nack_backoff: Duration,
}

/// Drains `queue` until it closes, dispatching each item and then
/// ack'ing or nack'ing it per spec §4.8.2's ACK policy.
pub async fn run_bridge_loop(
    bridge: Arc<GatewayBridge>,
    mut queue: mpsc::Receiver<BrokerMessage>,
    outbound: Arc<dyn GatewayOutbound>,
) {
    while let Some(msg) = queue.recv().await {
        metrics::counter!(mesh_config::metrics_init::names::EVENTS_RECEIVED, "topic" => msg.topic.clone()).increment(1);
        match dispatch_message(&bridge, &msg, outbound.as_ref()).await {
            Ok(()) => msg.ack(),
            Err(e) => {
                tracing::warn!(topic = %msg.topic, error = %e, "bridge dispatch failed, nacking");
                msg.nack();
                tokio::time::sleep(bridge.nack_backoff).await;
            }
        }
    }
}

/// Subscribes to this gateway's discovery, response, and status topics,
/// copies every matching broker message into a bounded internal queue, and
/// spawns [`run_bridge_loop`] to drain it on its own task — keeping the
/// broker's own receive callback non-blocking (spec §4.8: "runs a
/// dedicated async loop ... broker messages are copied into an internal
/// bounded queue").
pub async fn spawn_gateway(
    bridge: Arc<GatewayBridge>,
    broker: Arc<dyn BrokerClient>,
    outbound: Arc<dyn GatewayOutbound>,
    queue_capacity: usize,
) -> Result<tokio::task::JoinHandle<()>, BrokerError> {
    let (tx, rx) = mpsc::channel(queue_capacity);

    let subscriptions = [
        topics::discovery_subscription(&bridge.namespace),
        topics::gateway_response_subscription(&bridge.namespace, &bridge.gateway_id),
        topics::gateway_status_subscription(&bridge.namespace, &bridge.gateway_id),
    ];
    for pattern in subscriptions {
        let mut stream = broker.subscribe(&pattern).await?;
        let forward_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                if forward_tx.send(msg).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    Ok(tokio::spawn(run_bridge_loop(bridge, rx, outbound)))
}

async fn dispatch_message(bridge: &GatewayBridge, msg: &BrokerMessage, outbound: &dyn GatewayOutbound) -> Result<(), BridgeError> {
    let discovery_sub = topics::discovery_subscription(&bridge.namespace);
    if topics::topic_matches_subscription(&msg.topic, &discovery_sub) {
        let card: AgentCard = serde_json::from_slice(&msg.payload)?;
        bridge.registry.upsert(card);
        return Ok(());
    }

    let response_sub = topics::gateway_response_subscription(&bridge.namespace, &bridge.gateway_id);
    let status_sub = topics::gateway_status_subscription(&bridge.namespace, &bridge.gateway_id);

    let owned = topics::topic_matches_subscription(&msg.topic, &response_sub)
        || topics::topic_matches_subscription(&msg.topic, &status_sub);
    if !owned {
        // Not ours; ack and ignore per spec §4.8.2.
        return Ok(());
    }

    let prefix = response_sub
        .trim_end_matches('>')
        .trim_end_matches('/');
    let status_prefix = status_sub.trim_end_matches('>').trim_end_matches('/');
    let task_id = topics::extract_trailing_id(&msg.topic, prefix)
        .or_else(|| topics::extract_trailing_id(&msg.topic, status_prefix))
        .ok_or_else(|| BridgeError::MissingTaskId(msg.topic.clone()))?;

    let response: a2a_protocol::JsonRpcResponse = serde_json::from_slice(&msg.payload)?;
    if response.id != task_id {
        return Err(BridgeError::TaskIdMismatch {
            expected: task_id,
            got: response.id,
        });
    }

    process_parsed_a2a_event(bridge, &task_id, response, outbound).await
}

async fn process_parsed_a2a_event(
    bridge: &GatewayBridge,
    task_id: &str,
    response: a2a_protocol::JsonRpcResponse,
    outbound: &dyn GatewayOutbound,
) -> Result<(), BridgeError> {
    if let Some(error) = response.error {
        send(outbound, task_id, OutboundEvent::Error(error)).await?;
        bridge.context_manager.remove(task_id);
        bridge.context_manager.take_stream_buffer(task_id);
        return Ok(());
    }

    let result = response.result.ok_or(BridgeError::EmptyResult)?;
    let Some(ctx) = bridge.context_manager.get(task_id) else {
        // No external context for this task id: per spec §4.8.2 the event
        // belongs to no one the bridge is tracking, so it is dropped rather
        // than forwarded with a fabricated null context.
        metrics::counter!(mesh_config::metrics_init::names::EVENTS_DROPPED_NO_CONTEXT).increment(1);
        return Ok(());
    };
    let event: TaskEvent = serde_json::from_value(result)?;

    match event {
        TaskEvent::Task(mut task) => {
            flush_stream_buffer(bridge, task_id, &task, &ctx, outbound).await?;
            if bridge.resolve_artifact_uris {
                for artifact in task.artifacts.iter_mut() {
                    resolve_artifact_uris_in_parts(bridge, &mut artifact.parts);
                }
            }
            record_terminal_state(task.state);
            send(outbound, task_id, OutboundEvent::Terminal(task)).await?;
            bridge.context_manager.remove(task_id);
            bridge.context_manager.take_stream_buffer(task_id);
        }
        TaskEvent::StatusUpdate(mut update) => {
            let mut modified = false;
            if let Some(message) = update.status.message.as_mut() {
                if bridge.resolve_artifact_uris {
                    modified |= resolve_artifact_uris_in_parts(bridge, &mut message.parts);
                }
                let signals = resolve_late_embeds_in_parts(bridge, &mut message.parts, &ctx, &mut modified).await;
                emit_signals(task_id, &update.context_id, &signals, outbound).await?;
            }
            let carries_content = update
                .status
                .message
                .as_ref()
                .map(|m| !m.parts.is_empty())
                .unwrap_or(false);
            if modified || update.is_final || carries_content {
                send(outbound, task_id, OutboundEvent::StatusUpdate(update)).await?;
            }
        }
        TaskEvent::ArtifactUpdate(mut update) => {
            let mut modified = false;
            if bridge.resolve_artifact_uris {
                modified |= resolve_artifact_uris_in_parts(bridge, &mut update.artifact.parts);
            }
            let signals = resolve_late_embeds_in_parts(bridge, &mut update.artifact.parts, &ctx, &mut modified).await;
            emit_signals(task_id, &update.context_id, &signals, outbound).await?;
            send(outbound, task_id, OutboundEvent::ArtifactUpdate(update)).await?;
        }
    }
    Ok(())
}

/// Increments the terminal-state-by-kind counter spec §4.14 requires.
fn record_terminal_state(state: TaskState) {
    let name = match state {
        TaskState::Completed => mesh_config::metrics_init::names::TASKS_COMPLETED,
        TaskState::Failed => mesh_config::metrics_init::names::TASKS_FAILED,
        TaskState::Canceled => mesh_config::metrics_init::names::TASKS_CANCELED,
        // Submitted/Working shouldn't reach here (only terminal states end a
        // task), but count them rather than panic on an unexpected value.
        _ => return,
    };
    metrics::counter!(name).increment(1);
}

/// Resolves and publishes any text still held in the per-task stream
/// buffer as a final non-final status update, immediately before the
/// terminal event (spec §4.8.2 step 2d).
async fn flush_stream_buffer(
    bridge: &GatewayBridge,
    task_id: &str,
    task: &Task,
    ctx: &Value,
    outbound: &dyn GatewayOutbound,
) -> Result<(), BridgeError> {
    let buffered = bridge.context_manager.take_stream_buffer(task_id);
    if buffered.is_empty() {
        return Ok(());
    }
    let (resolved, signals) = resolve_recursive(&bridge.embeds, Phase::Late, &buffered, ctx, EMBED_MAX_DEPTH).await;
    emit_signals(task_id, &task.context_id, &signals, outbound).await?;
    if resolved.is_empty() {
        return Ok(());
    }
    let flush = TaskStatusUpdateEvent {
        task_id: task_id.to_string(),
        context_id: task.context_id.clone(),
        status: TaskStatusPayload {
            state: task.state,
            message: Some(Message {
                role: Role::Agent,
                parts: vec![Part::TextPart { text: resolved }],
                metadata: HashMap::new(),
            }),
        },
        is_final: false,
        metadata: HashMap::new(),
    };
    send(outbound, task_id, OutboundEvent::StatusUpdate(flush)).await
}

/// Resolves every `SIGNAL_STATUS_UPDATE` signal into its own non-final
/// status update carrying `{source: "gateway_signal"}` (spec §4.8.4).
async fn emit_signals(
    task_id: &str,
    context_id: &str,
    signals: &[Signal],
    outbound: &dyn GatewayOutbound,
) -> Result<(), BridgeError> {
    for signal in signals {
        if signal.kind != "SIGNAL_STATUS_UPDATE" {
            continue;
        }
        let mut metadata = HashMap::new();
        metadata.insert(SIGNAL_SOURCE_KEY.to_string(), Value::String(SIGNAL_SOURCE_VALUE.to_string()));
        let event = TaskStatusUpdateEvent {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            status: TaskStatusPayload {
                state: TaskState::Working,
                message: Some(Message {
                    role: Role::Agent,
                    parts: vec![Part::TextPart { text: signal.data.clone() }],
                    metadata: HashMap::new(),
                }),
            },
            is_final: false,
            metadata,
        };
        send(outbound, task_id, OutboundEvent::StatusUpdate(event)).await?;
    }
    Ok(())
}

/// Late-phase embed resolution over every text-bearing part: plain
/// `TextPart`s and text-like `FileWithBytes` parts (spec §4.8.2 step 2b,
/// §4.13).
async fn resolve_late_embeds_in_parts(bridge: &GatewayBridge, parts: &mut [Part], ctx: &Value, modified: &mut bool) -> Vec<Signal> {
    let mut all_signals = Vec::new();
    for part in parts.iter_mut() {
        match part {
            Part::TextPart { text } => {
                let (resolved, signals) = resolve_recursive(&bridge.embeds, Phase::Late, text, ctx, EMBED_MAX_DEPTH).await;
                if resolved != *text {
                    *text = resolved;
                    *modified = true;
                }
                all_signals.extend(signals);
            }
            Part::FilePart {
                file: FileVariant::WithBytes { mime_type: Some(mime), bytes, .. },
            } => {
                let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(bytes.as_bytes()) else {
                    continue;
                };
                let Ok(text) = String::from_utf8(decoded) else {
                    continue;
                };
                if !mesh_core::embed::is_scannable_container(mime, &text) {
                    continue;
                }
                let (resolved, signals) = resolve_recursive(&bridge.embeds, Phase::Late, &text, ctx, EMBED_MAX_DEPTH).await;
                all_signals.extend(signals);
                if resolved != text {
                    *bytes = base64::engine::general_purpose::STANDARD.encode(resolved.as_bytes());
                    *modified = true;
                }
            }
            _ => {}
        }
    }
    all_signals
}

/// Replaces `FileWithUri` parts whose `uri` is an `artifact://` reference
/// with inline `FileWithBytes`, loaded from the Artifact Service (spec
/// §4.8.2 step 2a). No-op when no artifact service is configured.
fn resolve_artifact_uris_in_parts(bridge: &GatewayBridge, parts: &mut [Part]) -> bool {
    let Some(artifacts) = bridge.artifacts.as_ref() else {
        return false;
    };
    let mut modified = false;
    for part in parts.iter_mut() {
        if let Part::FilePart { file } = part {
            if let FileVariant::WithUri { name, mime_type, uri } = file {
                let Some((scope, user, session, filename, version)) = parse_artifact_uri(uri) else {
                    continue;
                };
                let Some(loaded) = artifacts.load(&scope, &user, &session, &filename, version) else {
                    continue;
                };
                let bytes = base64::engine::general_purpose::STANDARD.encode(loaded.bytes.as_slice());
                *file = FileVariant::WithBytes {
                    name: name.clone().or(Some(filename)),
                    mime_type: mime_type.clone().or(Some(loaded.mime_type)),
                    bytes,
                };
                modified = true;
            }
        }
    }
    modified
}

async fn send(outbound: &dyn GatewayOutbound, task_id: &str, event: OutboundEvent) -> Result<(), BridgeError> {
    outbound.send_event(task_id, event).await.map_err(BridgeError::Outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use a2a_protocol::{JsonRpcResponse, UserProperties};
    use mesh_core::embed::{EmbedHandler, HandlerOutcome};
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct RecordingOutbound {
        events: Mutex<Vec<(String, OutboundEvent)>>,
    }

    impl RecordingOutbound {
        fn new() -> Self {
            Self { events: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl GatewayOutbound for RecordingOutbound {
        async fn send_event(&self, task_id: &str, event: OutboundEvent) -> Result<(), String> {
            self.events.lock().unwrap().push((task_id.to_string(), event));
            Ok(())
        }
    }

    struct UppercaseHandler;
    #[async_trait]
    impl EmbedHandler for UppercaseHandler {
        fn phase(&self) -> Phase {
            Phase::Late
        }
        async fn resolve(&self, expression: &str, _context: &Value) -> HandlerOutcome {
            HandlerOutcome { text: Some(expression.to_uppercase()), signal: None }
        }
    }

    fn namespace() -> Namespace {
        Namespace::new("acme/dev").unwrap()
    }

    fn bridge() -> (Arc<GatewayBridge>, Arc<RecordingOutbound>) {
        let mut registry = EmbedRegistry::new();
        registry.register("upper", Arc::new(UppercaseHandler));
        let bridge = Arc::new(GatewayBridge {
            namespace: namespace(),
            gateway_id: "gw-1".to_string(),
            registry: Arc::new(AgentRegistry::new(StdDuration::from_secs(60))),
            context_manager: Arc::new(TaskContextManager::new()),
            artifacts: None,
            embeds: Arc::new(registry),
            resolve_artifact_uris: false,
            nack_backoff: StdDuration::from_millis(1),
        });
        (bridge, Arc::new(RecordingOutbound::new()))
    }

    fn status_payload(task_id: &str, text: &str, is_final: bool) -> Value {
        let event = TaskEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.to_string(),
            context_id: "ctx-1".to_string(),
            status: TaskStatusPayload {
                state: TaskState::Working,
                message: Some(Message {
                    role: Role::Agent,
                    parts: vec![Part::TextPart { text: text.to_string() }],
                    metadata: HashMap::new(),
                }),
            },
            is_final,
            metadata: HashMap::new(),
        });
        serde_json::to_value(JsonRpcResponse::success(task_id, serde_json::to_value(event).unwrap())).unwrap()
    }

    #[tokio::test]
    async fn discovery_topic_upserts_registry() {
        let (bridge, outbound) = bridge();
        let card = AgentCard {
            name: "weather".to_string(),
            description: "forecasts".to_string(),
            capabilities: vec![],
            metadata: Value::Null,
        };
        let msg = BrokerMessage::detached(
            topics::discovery_agentcard(&bridge.namespace, "weather"),
            serde_json::to_vec(&card).unwrap(),
            UserProperties::default(),
        );
        dispatch_message(&bridge, &msg, outbound.as_ref()).await.unwrap();
        assert!(bridge.registry.get("weather").is_some());
    }

    #[tokio::test]
    async fn unowned_topic_is_ignored() {
        let (bridge, outbound) = bridge();
        let msg = BrokerMessage::detached("acme/dev/unrelated/topic", vec![], UserProperties::default());
        dispatch_message(&bridge, &msg, outbound.as_ref()).await.unwrap();
        assert!(outbound.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_update_resolves_late_embeds_and_forwards() {
        let (bridge, outbound) = bridge();
        let task_id = "t-1";
        bridge.context_manager.store(task_id, Value::Null);
        let topic = topics::gateway_response(&bridge.namespace, "gw-1", task_id);
        let payload = status_payload(task_id, "hi «upper:world»", false);
        let msg = BrokerMessage::detached(topic, serde_json::to_vec(&payload).unwrap(), UserProperties::default());

        dispatch_message(&bridge, &msg, outbound.as_ref()).await.unwrap();

        let events = outbound.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0].1 {
            OutboundEvent::StatusUpdate(update) => {
                let text = match &update.status.message.as_ref().unwrap().parts[0] {
                    Part::TextPart { text } => text.clone(),
                    _ => panic!("expected text part"),
                };
                assert_eq!(text, "hi WORLD");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_unmodified_status_update_is_dropped() {
        let (bridge, outbound) = bridge();
        let task_id = "t-1";
        bridge.context_manager.store(task_id, Value::Null);
        let topic = topics::gateway_status(&bridge.namespace, "gw-1", task_id);
        let event = TaskEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.to_string(),
            context_id: "ctx-1".to_string(),
            status: TaskStatusPayload { state: TaskState::Working, message: None },
            is_final: false,
            metadata: HashMap::new(),
        });
        let payload = serde_json::to_value(JsonRpcResponse::success(task_id, serde_json::to_value(event).unwrap())).unwrap();
        let msg = BrokerMessage::detached(topic, serde_json::to_vec(&payload).unwrap(), UserProperties::default());

        dispatch_message(&bridge, &msg, outbound.as_ref()).await.unwrap();
        assert!(outbound.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn event_for_a_task_with_no_external_context_is_dropped() {
        let (bridge, outbound) = bridge();
        let task_id = "t-1";
        let topic = topics::gateway_response(&bridge.namespace, "gw-1", task_id);
        let payload = status_payload(task_id, "hi", true);
        let msg = BrokerMessage::detached(topic, serde_json::to_vec(&payload).unwrap(), UserProperties::default());

        dispatch_message(&bridge, &msg, outbound.as_ref()).await.unwrap();
        assert!(outbound.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn task_id_mismatch_is_rejected() {
        let (bridge, outbound) = bridge();
        let topic = topics::gateway_response(&bridge.namespace, "gw-1", "t-1");
        let payload = status_payload("t-WRONG", "hi", false);
        let msg = BrokerMessage::detached(topic, serde_json::to_vec(&payload).unwrap(), UserProperties::default());

        let result = dispatch_message(&bridge, &msg, outbound.as_ref()).await;
        assert!(matches!(result, Err(BridgeError::TaskIdMismatch { .. })));
    }

    #[tokio::test]
    async fn error_response_clears_context_and_forwards_error() {
        let (bridge, outbound) = bridge();
        let task_id = "t-1";
        bridge.context_manager.store(task_id, serde_json::json!({"channel": "web"}));
        let topic = topics::gateway_response(&bridge.namespace, "gw-1", task_id);
        let resp = JsonRpcResponse::error(
            task_id,
            JSONRPCError::new(a2a_protocol::ErrorCode::OperationFailed, "boom"),
        );
        let payload = serde_json::to_vec(&resp).unwrap();
        let msg = BrokerMessage::detached(topic, payload, UserProperties::default());

        dispatch_message(&bridge, &msg, outbound.as_ref()).await.unwrap();

        assert!(bridge.context_manager.get(task_id).is_none());
        let events = outbound.events.lock().unwrap();
        assert!(matches!(events[0].1, OutboundEvent::Error(_)));
    }

    #[tokio::test]
    async fn terminal_task_flushes_stream_buffer_before_terminal_event() {
        let (bridge, outbound) = bridge();
        let task_id = "t-1";
        bridge.context_manager.store(task_id, Value::Null);
        bridge.context_manager.push_stream_buffer(task_id, "partial «upper:tail»");
        let topic = topics::gateway_response(&bridge.namespace, "gw-1", task_id);
        let task = Task::new_submitted(task_id, "ctx-1");
        let event = TaskEvent::Task(Task { state: TaskState::Completed, ..task });
        let payload = serde_json::to_value(JsonRpcResponse::success(task_id, serde_json::to_value(event).unwrap())).unwrap();
        let msg = BrokerMessage::detached(topic, serde_json::to_vec(&payload).unwrap(), UserProperties::default());

        dispatch_message(&bridge, &msg, outbound.as_ref()).await.unwrap();

        let events = outbound.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].1, OutboundEvent::StatusUpdate(_)));
        assert!(matches!(events[1].1, OutboundEvent::Terminal(_)));
        assert_eq!(bridge.context_manager.take_stream_buffer(task_id), "");
    }
}
