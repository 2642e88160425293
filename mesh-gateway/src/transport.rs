//! Reference WebSocket transport: one route, one connection per external
//! client, demultiplexing outbound events back to the connection that
//! submitted each task.
//!
//! Grounded on `serve::{app::router, connection::handle_socket}`: the same
//! "axum state + `ws.on_upgrade`" shape, retargeted from a single shared
//! agent-run socket to many independently-submitted A2A tasks sharing one
//! gateway app.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use a2a_protocol::topics::Namespace;
use a2a_protocol::Part;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use mesh_broker::BrokerClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bridge::{GatewayOutbound, OutboundEvent};
use crate::context_manager::TaskContextManager;
use crate::submit::{submit_a2a_task, AccessValidator, SubmitError, SubmitRequest, UserIdentity};

/// `task_id → this connection's outbound channel`, shared by every
/// WebSocket connection and the one bridge loop running for this gateway
/// app (spec §4.8: "bridges it to the mesh").
#[derive(Default)]
pub struct ConnectionRegistry {
    senders: DashMap<String, mpsc::UnboundedSender<OutboundEvent>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, task_id: String, sender: mpsc::UnboundedSender<OutboundEvent>) {
        self.senders.insert(task_id, sender);
    }

    fn unregister(&self, task_id: &str) {
        self.senders.remove(task_id);
    }
}

#[async_trait]
impl GatewayOutbound for ConnectionRegistry {
    async fn send_event(&self, task_id: &str, event: OutboundEvent) -> Result<(), String> {
        match self.senders.get(task_id) {
            // Connection already closed; nothing to deliver to.
            None => Ok(()),
            Some(sender) => sender.send(event).map_err(|e| e.to_string()),
        }
    }
}

pub struct GatewayAppState {
    pub namespace: Namespace,
    pub gateway_id: String,
    pub broker: Arc<dyn BrokerClient>,
    pub context_manager: Arc<TaskContextManager>,
    pub access_validator: Arc<dyn AccessValidator>,
    pub connections: Arc<ConnectionRegistry>,
}

pub fn router(state: Arc<GatewayAppState>) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<GatewayAppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Deserialize)]
struct ClientSubmitRequest {
    target_agent: String,
    text: String,
    user_id: String,
    #[serde(default)]
    streaming: bool,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireEvent<'a> {
    StatusUpdate { task_id: &'a str, event: &'a a2a_protocol::wire::TaskStatusUpdateEvent },
    ArtifactUpdate { task_id: &'a str, event: &'a a2a_protocol::wire::TaskArtifactUpdateEvent },
    Terminal { task_id: &'a str, task: &'a a2a_protocol::wire::Task },
    Error { task_id: &'a str, error: &'a a2a_protocol::wire::JSONRPCError },
}

async fn handle_socket(mut socket: WebSocket, state: Arc<GatewayAppState>) {
    loop {
        let msg = match socket.recv().await {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                tracing::warn!("gateway websocket read error: {e}");
                break;
            }
            None => break,
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8_lossy(&b).into_owned(),
            Message::Close(_) => break,
            _ => continue,
        };

        let req: ClientSubmitRequest = match serde_json::from_str(&text) {
            Ok(r) => r,
            Err(e) => {
                let _ = send_error(&mut socket, &format!("parse error: {e}")).await;
                continue;
            }
        };

        if let Err(e) = handle_submit(&mut socket, &state, req).await {
            tracing::warn!(error = %e, "gateway submit failed");
            let _ = send_error(&mut socket, &e.to_string()).await;
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum HandleSubmitError {
    #[error(transparent)]
    Submit(#[from] SubmitError),
    #[error("failed to send over websocket: {0}")]
    Send(#[from] axum::Error),
}

async fn handle_submit(
    socket: &mut WebSocket,
    state: &GatewayAppState,
    req: ClientSubmitRequest,
) -> Result<(), HandleSubmitError> {
    let identity = UserIdentity { id: req.user_id };
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();

    let task_id = submit_a2a_task(
        &state.namespace,
        &state.gateway_id,
        &state.broker,
        &state.context_manager,
        state.access_validator.as_ref(),
        SubmitRequest {
            target_agent: &req.target_agent,
            parts: vec![Part::TextPart { text: req.text }],
            external_ctx: Value::Null,
            user_identity: Some(&identity),
            streaming: req.streaming,
        },
        reception_timestamp(),
        || format!("gdk-task-{}", Uuid::new_v4()),
    )
    .await?;

    state.connections.register(task_id.clone(), tx);

    while let Some(event) = rx.recv().await {
        let done = matches!(event, OutboundEvent::Terminal(_) | OutboundEvent::Error(_));
        let wire = to_wire(&task_id, &event);
        socket
            .send(Message::Text(serde_json::to_string(&wire).unwrap_or_default()))
            .await?;
        if done {
            break;
        }
    }
    state.connections.unregister(&task_id);
    Ok(())
}

fn to_wire<'a>(task_id: &'a str, event: &'a OutboundEvent) -> WireEvent<'a> {
    match event {
        OutboundEvent::StatusUpdate(e) => WireEvent::StatusUpdate { task_id, event: e },
        OutboundEvent::ArtifactUpdate(e) => WireEvent::ArtifactUpdate { task_id, event: e },
        OutboundEvent::Terminal(t) => WireEvent::Terminal { task_id, task: t },
        OutboundEvent::Error(e) => WireEvent::Error { task_id, error: e },
    }
}

async fn send_error(socket: &mut WebSocket, message: &str) -> Result<(), axum::Error> {
    socket
        .send(Message::Text(serde_json::json!({"kind": "error", "error": message}).to_string()))
        .await
}

fn reception_timestamp() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("received at {secs}")
}
