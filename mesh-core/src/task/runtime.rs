//! Agent Task Runtime (spec §4.7): the concrete [`AppComponent`] an agent
//! app wires up to receive `message/send`/`message/stream`/`tasks/cancel`
//! requests on its own `agent/request/{name}` topic and drive each to a
//! terminal event.
//!
//! Grounded on `serve::run::delivery::handle_run_stream`'s receive-drive-
//! respond loop: one broker subscription replaces the single WebSocket
//! client, and every request spawns its own [`TaskDriver`] instead of the
//! one-run-per-connection model. Tool/peer dispatch during a turn (the
//! "act" phase the module doc of `driver.rs` names) is left to the
//! concrete [`LlmDriver`] a deployment supplies, the same way shipping a
//! specific LLM is left out of this crate; this component only drives the
//! turn to completion and carries cancellation through to
//! [`cancel_active_sub_tasks`].

use std::sync::Arc;

use a2a_protocol::topics::{self, Namespace};
use a2a_protocol::wire::{ErrorCode, JSONRPCError, Message, Task, TaskState};
use a2a_protocol::{JsonRpcRequest, JsonRpcResponse, UserProperties};
use async_trait::async_trait;
use dashmap::DashMap;
use mesh_broker::{BrokerClient, BrokerMessage};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::app::AppComponent;
use crate::session::Event;

use super::context::{TaskContext, TaskContextRegistry};
use super::driver::{LlmDriver, TaskDriver, TaskDriverConfig};
use super::peer::{cancel_active_sub_tasks, PeerCoordinator};
use super::types::{assistant_message, terminal_task, DriverError, DriverOutcome};

const METHOD_SEND: &str = "message/send";
const METHOD_STREAM: &str = "message/stream";
const METHOD_CANCEL: &str = "tasks/cancel";

/// One agent app's request-serving component. `request.id` doubles as the
/// `task_id` throughout (spec §4.8.1 allocates it on the gateway side and
/// carries it unchanged in every downstream envelope).
pub struct AgentTaskComponent {
    pub agent_name: String,
    pub namespace: Namespace,
    pub llm: Arc<dyn LlmDriver>,
    pub driver_config: TaskDriverConfig,
    pub contexts: Arc<TaskContextRegistry>,
    peer_coordinators: DashMap<String, Arc<PeerCoordinator>>,
}

impl AgentTaskComponent {
    pub fn new(agent_name: impl Into<String>, namespace: Namespace, llm: Arc<dyn LlmDriver>, driver_config: TaskDriverConfig) -> Self {
        Self {
            agent_name: agent_name.into(),
            namespace,
            llm,
            driver_config,
            contexts: Arc::new(TaskContextRegistry::new()),
            peer_coordinators: DashMap::new(),
        }
    }

    async fn dispatch(self: Arc<Self>, broker: Arc<dyn BrokerClient>, msg: BrokerMessage) {
        let request: JsonRpcRequest = match serde_json::from_slice(&msg.payload) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(agent = %self.agent_name, error = %e, "malformed json-rpc request on agent topic");
                msg.nack();
                return;
            }
        };
        msg.ack();

        match request.method.as_str() {
            METHOD_SEND | METHOD_STREAM => {
                let streaming = request.method == METHOD_STREAM;
                self.handle_submit(broker, request, msg.user_properties, streaming).await;
            }
            METHOD_CANCEL => {
                self.handle_cancel(broker.as_ref(), &request).await;
            }
            other => {
                tracing::warn!(agent = %self.agent_name, method = %other, "unsupported method on agent request topic");
                let error = JSONRPCError::new(ErrorCode::MethodNotAllowed, format!("unknown method {other}"));
                self.publish_response(&broker, &msg.user_properties, JsonRpcResponse::error(request.id, error))
                    .await;
            }
        }
    }

    /// Cancellation propagation entry point (spec §4.7.4, P8, S3): flips
    /// the task's cancellation flag and fans the cancellation out to every
    /// peer sub-task still active for it. The task's own in-flight
    /// `drive()` call observes the flag on its next step and is the one
    /// that publishes the terminal `canceled` Task (§4.7.1 invariant ii:
    /// exactly one terminal event).
    async fn handle_cancel(&self, broker: &dyn BrokerClient, request: &JsonRpcRequest) {
        let task_id = request.id.as_str();
        if !self.contexts.request_cancel(task_id) {
            return;
        }
        if let Some(peers) = self.peer_coordinators.get(task_id).map(|e| e.clone()) {
            let errors = cancel_active_sub_tasks(&peers, broker, &self.namespace).await;
            for e in errors {
                tracing::warn!(task_id = %task_id, error = %e, "failed to publish cancellation to a peer sub-task");
            }
        }
    }

    async fn handle_submit(
        self: Arc<Self>,
        broker: Arc<dyn BrokerClient>,
        request: JsonRpcRequest,
        user_properties: UserProperties,
        _streaming: bool,
    ) {
        let task_id = request.id.clone();
        let context_id = task_id.clone();

        let message: Message = match request.params.clone().map(serde_json::from_value).transpose() {
            Ok(Some(m)) => m,
            _ => {
                let error = JSONRPCError::new(ErrorCode::InvalidParams, "params must be an A2A Message");
                self.publish_response(&broker, &user_properties, JsonRpcResponse::error(task_id, error))
                    .await;
                return;
            }
        };

        let ctx = Arc::new(TaskContext::new(task_id.clone(), context_id.clone(), None, Value::Null));
        self.contexts.register(ctx.clone());
        let peers = Arc::new(PeerCoordinator::new());
        self.peer_coordinators.insert(task_id.clone(), peers.clone());

        let mut driver = TaskDriver::new(self.llm.clone(), self.clone_driver_config(), ctx.cancellation_flag());
        driver.peers = peers;

        let history = vec![Event {
            seq: 0,
            invocation_id: format!("{task_id}-submit"),
            author: "user".to_string(),
            content_json: serde_json::to_value(&message).unwrap_or(Value::Null),
            actions_json: Value::Null,
            timestamp: 0,
        }];

        let task = Task::new_submitted(task_id.clone(), context_id);
        let outcome = driver.drive(history).await;

        // A paused task stays registered — it's resumed by whatever
        // publishes the peer/sandbox response, not by this submit path —
        // so only a settled outcome clears its bookkeeping here.
        if !matches!(outcome, Ok(DriverOutcome::Paused)) {
            self.contexts.remove(&task_id);
            self.peer_coordinators.remove(&task_id);
        }

        let final_task = match outcome {
            Ok(DriverOutcome::Done) => {
                let mut task = task;
                let text = driver.buffer.take();
                if !text.is_empty() {
                    task.history.push(assistant_message(text));
                }
                terminal_task(task, TaskState::Completed)
            }
            Ok(DriverOutcome::Paused) => return,
            Err(DriverError::Cancelled) => terminal_task(task, TaskState::Canceled),
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "task driver failed");
                terminal_task(task, TaskState::Failed)
            }
        };

        let event = a2a_protocol::wire::TaskEvent::Task(final_task);
        let response = JsonRpcResponse::success(task_id, serde_json::to_value(event).unwrap_or(Value::Null));
        self.publish_response(&broker, &user_properties, response).await;
    }

    fn clone_driver_config(&self) -> TaskDriverConfig {
        TaskDriverConfig {
            max_llm_calls_per_task: self.driver_config.max_llm_calls_per_task,
        }
    }

    async fn publish_response(&self, broker: &Arc<dyn BrokerClient>, user_properties: &UserProperties, response: JsonRpcResponse) {
        let Some(reply_to) = user_properties.reply_to.clone() else {
            tracing::warn!(agent = %self.agent_name, "no replyTo on request, dropping response");
            return;
        };
        let payload = serde_json::to_vec(&response).unwrap_or_default();
        if let Err(e) = broker.publish(&reply_to, payload, UserProperties::default()).await {
            tracing::warn!(agent = %self.agent_name, error = %e, "failed to publish task response");
        }
    }
}

#[async_trait]
impl AppComponent for AgentTaskComponent {
    fn name(&self) -> &str {
        &self.agent_name
    }

    async fn start(self: Arc<Self>, broker: Arc<dyn BrokerClient>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let pattern = topics::agent_request(&self.namespace, &self.agent_name);
            let mut stream = match broker.subscribe(&pattern).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(agent = %self.agent_name, error = %e, "agent task component failed to subscribe");
                    return;
                }
            };
            while let Some(msg) = stream.next().await {
                let this = self.clone();
                let broker = broker.clone();
                tokio::spawn(async move { this.dispatch(broker, msg).await });
            }
        })
    }
}
