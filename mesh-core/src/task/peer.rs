//! Peer delegation & parallel aggregation (spec §4.7.4).

use std::sync::Arc;

use a2a_protocol::topics::{self, Namespace};
use a2a_protocol::CancelTaskRequest;
use dashmap::DashMap;
use mesh_broker::{BrokerClient, BrokerError};
use serde_json::Value;

use super::barrier::NamedBarrier;

#[derive(Clone, Debug)]
pub struct PeerSubTask {
    pub peer_agent_name: String,
    pub adk_function_call_id: String,
}

#[derive(Clone, Debug)]
pub struct PeerResult {
    pub adk_function_call_id: String,
    pub peer_tool_name: String,
    pub payload: Value,
}

/// Per-task coordinator: `active_peer_sub_tasks` (sub_task_id → peer
/// identity) plus, per invocation id, a barrier over the sub-task ids
/// dispatched for that LLM turn and the results collected so far.
#[derive(Default)]
pub struct PeerCoordinator {
    active: DashMap<String, PeerSubTask>,
    barriers: DashMap<String, NamedBarrier<String>>,
    results: DashMap<String, Vec<PeerResult>>,
}

impl PeerCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a dispatched peer call. Call once per peer request
    /// published, before the publish (so a racing response can never arrive
    /// before the barrier knows to expect it).
    pub fn dispatch(
        &self,
        invocation_id: &str,
        sub_task_id: &str,
        peer_agent_name: impl Into<String>,
        adk_function_call_id: impl Into<String>,
    ) {
        self.active.insert(
            sub_task_id.to_string(),
            PeerSubTask {
                peer_agent_name: peer_agent_name.into(),
                adk_function_call_id: adk_function_call_id.into(),
            },
        );
        self.barriers
            .entry(invocation_id.to_string())
            .or_insert_with(|| NamedBarrier::from_names(vec![]))
            .grow(sub_task_id.to_string());
        metrics::counter!(mesh_config::metrics_init::names::PEER_DELEGATIONS).increment(1);
    }

    /// Correlates a peer response by `sub_task_id`. Returns `Some(results)`
    /// once every sub-task sharing `invocation_id` has reported — the
    /// caller should synthesize a tool-role message from them and re-enter
    /// the driver loop (spec §4.7.4).
    pub fn on_peer_response(
        &self,
        invocation_id: &str,
        sub_task_id: &str,
        payload: Value,
    ) -> Option<Vec<PeerResult>> {
        let sub_task = self.active.remove(sub_task_id).map(|(_, v)| v)?;
        self.results.entry(invocation_id.to_string()).or_default().push(PeerResult {
            adk_function_call_id: sub_task.adk_function_call_id,
            peer_tool_name: sub_task.peer_agent_name,
            payload,
        });

        let mut barrier = self.barriers.get_mut(invocation_id)?;
        let available = barrier.mark_seen(&sub_task_id.to_string()).ok()?;
        if available {
            drop(barrier);
            self.barriers.remove(invocation_id);
            self.results.remove(invocation_id).map(|(_, v)| v)
        } else {
            None
        }
    }

    /// Cancellation propagation (spec §4.7.4): every currently active peer
    /// sub-task, to emit `CancelTaskRequest` against.
    pub fn active_sub_tasks(&self) -> Vec<(String, PeerSubTask)> {
        self.active.iter().map(|e| (e.key().clone(), e.value().clone())).collect()
    }

    pub fn clear(&self) {
        self.active.clear();
        self.barriers.clear();
        self.results.clear();
    }
}

/// Fans out cancellation (spec §4.7.4, P8): publishes a [`CancelTaskRequest`]
/// to every currently active peer sub-task's agent-request topic. Clears the
/// coordinator's state once every publish has been attempted, regardless of
/// individual failures, so a half-delivered cancellation never leaves stale
/// bookkeeping behind.
pub async fn cancel_active_sub_tasks(
    coordinator: &PeerCoordinator,
    broker: &dyn BrokerClient,
    namespace: &Namespace,
) -> Vec<BrokerError> {
    let mut errors = Vec::new();
    for (sub_task_id, sub_task) in coordinator.active_sub_tasks() {
        let topic = topics::agent_request(namespace, &sub_task.peer_agent_name);
        let request = CancelTaskRequest { task_id: sub_task_id };
        let payload = serde_json::to_vec(&request).unwrap_or_default();
        if let Err(e) = broker.publish(&topic, payload, Default::default()).await {
            errors.push(e);
        }
    }
    coordinator.clear();
    errors
}
