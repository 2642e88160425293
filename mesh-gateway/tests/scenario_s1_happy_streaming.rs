//! S1 — happy streaming task, end to end over a real [`DevBroker`]: a
//! gateway submits a task to a fake agent, the fake agent publishes one
//! status update followed by a terminal `Task{state:"completed"}`, and the
//! gateway's own connection observes both.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use a2a_protocol::topics::{self, Namespace};
use a2a_protocol::wire::{Message, Part, Role, Task, TaskEvent, TaskState, TaskStatusPayload, TaskStatusUpdateEvent};
use a2a_protocol::{JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use mesh_broker::{BrokerClient, DevBroker};
use mesh_core::embed::EmbedRegistry;
use mesh_core::registry::AgentRegistry;
use mesh_gateway::bridge::{spawn_gateway, GatewayBridge, GatewayOutbound, OutboundEvent};
use mesh_gateway::context_manager::TaskContextManager;
use mesh_gateway::submit::{submit_a2a_task, AllowAllAccessValidator, SubmitRequest, UserIdentity};
use tokio_stream::StreamExt;

struct RecordingOutbound {
    events: Mutex<Vec<OutboundEvent>>,
}

#[async_trait]
impl GatewayOutbound for RecordingOutbound {
    async fn send_event(&self, _task_id: &str, event: OutboundEvent) -> Result<(), String> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

fn accumulated_text(events: &[OutboundEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            OutboundEvent::StatusUpdate(u) => u.status.message.as_ref(),
            _ => None,
        })
        .flat_map(|m| m.parts.iter())
        .map(|p| match p {
            Part::TextPart { text } => text.clone(),
            _ => String::new(),
        })
        .collect()
}

#[tokio::test]
async fn gateway_receives_status_update_then_terminal_completed_task() {
    let namespace = Namespace::new("acme/dev").unwrap();
    let broker: Arc<dyn BrokerClient> = Arc::new(DevBroker::new());

    let bridge = Arc::new(GatewayBridge {
        namespace: namespace.clone(),
        gateway_id: "gw-1".to_string(),
        registry: Arc::new(AgentRegistry::new(Duration::from_secs(60))),
        context_manager: Arc::new(TaskContextManager::new()),
        artifacts: None,
        embeds: Arc::new(EmbedRegistry::new()),
        resolve_artifact_uris: false,
        nack_backoff: Duration::from_millis(1),
    });
    let outbound = Arc::new(RecordingOutbound { events: Mutex::new(Vec::new()) });
    spawn_gateway(bridge.clone(), broker.clone(), outbound.clone(), 16).await.unwrap();

    // Fake agent: subscribes to its own request topic, replies on whatever
    // replyTo the gateway published.
    let mut agent_requests = broker.subscribe(&topics::agent_request(&namespace, "TestAgent")).await.unwrap();
    let agent_broker = broker.clone();
    tokio::spawn(async move {
        let msg = agent_requests.next().await.expect("gateway should submit a request");
        let request: JsonRpcRequest = serde_json::from_slice(&msg.payload).unwrap();
        let reply_to = msg.user_properties.reply_to.clone().expect("gateway sets replyTo");
        let task_id = request.id.clone();

        let status_event = TaskEvent::StatusUpdate(TaskStatusUpdateEvent {
            task_id: task_id.clone(),
            context_id: "ctx-1".to_string(),
            status: TaskStatusPayload {
                state: TaskState::Working,
                message: Some(Message {
                    role: Role::Agent,
                    parts: vec![Part::TextPart { text: "hello".to_string() }],
                    metadata: Default::default(),
                }),
            },
            is_final: false,
            metadata: Default::default(),
        });
        let status_response = JsonRpcResponse::success(task_id.clone(), serde_json::to_value(&status_event).unwrap());
        agent_broker
            .publish(&reply_to, serde_json::to_vec(&status_response).unwrap(), Default::default())
            .await
            .unwrap();

        let task = Task::new_submitted(&task_id, "ctx-1");
        let terminal_event = TaskEvent::Task(Task { state: TaskState::Completed, ..task });
        let terminal_response = JsonRpcResponse::success(task_id.clone(), serde_json::to_value(&terminal_event).unwrap());
        agent_broker
            .publish(&reply_to, serde_json::to_vec(&terminal_response).unwrap(), Default::default())
            .await
            .unwrap();
    });

    let identity = UserIdentity { id: "user-1".to_string() };
    let task_id = submit_a2a_task(
        &namespace,
        "gw-1",
        &broker,
        &bridge.context_manager,
        &AllowAllAccessValidator,
        SubmitRequest {
            target_agent: "TestAgent",
            parts: vec![Part::TextPart { text: "hi".to_string() }],
            external_ctx: serde_json::Value::Null,
            user_identity: Some(&identity),
            streaming: true,
        },
        "received at 0",
        || "gw-task-1".to_string(),
    )
    .await
    .unwrap();
    assert_eq!(task_id, "gw-task-1");

    // Give both spawned tasks a chance to run the full exchange.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let saw_terminal = outbound
            .events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, OutboundEvent::Terminal(_)));
        if saw_terminal || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let events = outbound.events.lock().unwrap();
    assert_eq!(accumulated_text(&events), "hello");
    let terminal_count = events.iter().filter(|e| matches!(e, OutboundEvent::Terminal(_))).count();
    assert_eq!(terminal_count, 1, "exactly one terminal event (P1)");
    match events.iter().find(|e| matches!(e, OutboundEvent::Terminal(_))).unwrap() {
        OutboundEvent::Terminal(task) => assert_eq!(task.state, TaskState::Completed),
        _ => unreachable!(),
    }
}
