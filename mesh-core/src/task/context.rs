//! Per-task context (spec §4.7.2 steps 1-2): the `a2a_context` state-delta
//! carried into the driver loop, the captured `external_request_context`,
//! and the shared cancellation flag checked on every LLM event (step 2d).
//!
//! Grounded on `serve::app::AppState`'s `Arc<Mutex<...>>` registry pattern,
//! generalized from "one state per connection" to "one context per task".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;

/// Everything the driver loop threads through one task's lifetime.
pub struct TaskContext {
    pub task_id: String,
    pub context_id: String,
    pub parent_task_id: Option<String>,
    /// Set from the first LLM event's invocation id (step 2b).
    invocation_id: std::sync::Mutex<Option<String>>,
    /// Opaque state carried in as `state_delta` on the context-setting event
    /// (step 1) — not interpreted here, only threaded through.
    pub a2a_context: Value,
    /// Captured alongside the invocation id (step 2b): whatever the external
    /// transport attached to the originating request (headers, auth, etc).
    external_request_context: std::sync::Mutex<Value>,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext {
    pub fn new(task_id: impl Into<String>, context_id: impl Into<String>, parent_task_id: Option<String>, a2a_context: Value) -> Self {
        Self {
            task_id: task_id.into(),
            context_id: context_id.into(),
            parent_task_id,
            invocation_id: std::sync::Mutex::new(None),
            a2a_context,
            external_request_context: std::sync::Mutex::new(Value::Null),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_task_id.is_none()
    }

    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Captures the first event's invocation id (step 2b) — a no-op on
    /// subsequent events, since only the first carries it.
    pub fn capture_invocation_id(&self, invocation_id: impl Into<String>) {
        let mut guard = self.invocation_id.lock().expect("invocation_id lock poisoned");
        if guard.is_none() {
            *guard = Some(invocation_id.into());
        }
    }

    pub fn invocation_id(&self) -> Option<String> {
        self.invocation_id.lock().expect("invocation_id lock poisoned").clone()
    }

    pub fn set_external_request_context(&self, value: Value) {
        *self.external_request_context.lock().expect("external_request_context lock poisoned") = value;
    }

    pub fn external_request_context(&self) -> Value {
        self.external_request_context.lock().expect("external_request_context lock poisoned").clone()
    }
}

/// Registry of live task contexts, keyed by `task_id`. A gateway or the
/// control plane looks tasks up here to flip the cancellation flag a
/// driver loop polls on every LLM event (§4.7.2 step 2d).
#[derive(Default)]
pub struct TaskContextRegistry {
    contexts: DashMap<String, Arc<TaskContext>>,
}

impl TaskContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, ctx: Arc<TaskContext>) {
        self.contexts.insert(ctx.task_id.clone(), ctx);
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<TaskContext>> {
        self.contexts.get(task_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, task_id: &str) -> Option<Arc<TaskContext>> {
        self.contexts.remove(task_id).map(|(_, v)| v)
    }

    /// Returns `true` if the task was found and its cancellation flag set.
    pub fn request_cancel(&self, task_id: &str) -> bool {
        match self.get(task_id) {
            Some(ctx) => {
                ctx.request_cancel();
                true
            }
            None => false,
        }
    }
}
