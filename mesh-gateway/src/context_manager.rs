//! Task Context Manager (spec §4.8.3): `task_id → external_ctx`, plus an
//! auxiliary `task_id → stream_buffer` map. Thread-safe, O(1), brief holds.
//!
//! Grounded on `serve::app::AppState`'s `Arc<Mutex<...>>` pattern,
//! generalized from one connection's state to a map keyed by task id.

use dashmap::DashMap;
use serde_json::Value;

#[derive(Default)]
pub struct TaskContextManager {
    external_ctx: DashMap<String, Value>,
    stream_buffers: DashMap<String, String>,
}

impl TaskContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, task_id: impl Into<String>, ctx: Value) {
        self.external_ctx.insert(task_id.into(), ctx);
    }

    pub fn get(&self, task_id: &str) -> Option<Value> {
        self.external_ctx.get(task_id).map(|e| e.value().clone())
    }

    pub fn remove(&self, task_id: &str) -> Option<Value> {
        self.external_ctx.remove(task_id).map(|(_, v)| v)
    }

    pub fn push_stream_buffer(&self, task_id: &str, chunk: &str) {
        self.stream_buffers.entry(task_id.to_string()).or_default().push_str(chunk);
    }

    pub fn take_stream_buffer(&self, task_id: &str) -> String {
        self.stream_buffers.remove(task_id).map(|(_, v)| v).unwrap_or_default()
    }

    pub fn clear_all(&self) {
        self.external_ctx.clear();
        self.stream_buffers.clear();
    }

    pub fn len(&self) -> usize {
        self.external_ctx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.external_ctx.is_empty()
    }
}
