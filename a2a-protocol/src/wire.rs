//! Wire types carried inside JSON-RPC envelopes: `Task`, `Message`, `Part`,
//! status/artifact update events, and `JSONRPCError`.
//!
//! Grounded on `stream-event::event::ProtocolEvent` — an internally tagged
//! enum driven entirely by `#[serde(tag = ..., rename_all = "snake_case")]` —
//! applied here to the A2A result/event shapes named in spec §6.1.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// `submitted → working ↔ input_required → {completed, failed, canceled}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    /// True for the three states that end a task's lifecycle (P1: exactly
    /// one terminal event per task).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// One part of a [`Message`]'s content.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    TextPart { text: String },
    FilePart { file: FileVariant },
    DataPart { data: Value },
}

/// `FileWithUri.uri` may use the `artifact://{scope}/{user}/{session}/{name}?version=N` scheme.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileVariant {
    WithBytes {
        name: Option<String>,
        mime_type: Option<String>,
        bytes: String,
    },
    WithUri {
        name: Option<String>,
        mime_type: Option<String>,
        uri: String,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    pub artifact_id: String,
    pub name: String,
    pub parts: Vec<Part>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// The unit of request/response. Invariant (iii): every status/artifact
/// update carries `task_id` equal to this root task's id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub logical_task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    pub context_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    pub fn new_submitted(task_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self {
            logical_task_id: task_id.clone(),
            task_id,
            parent_task_id: None,
            context_id: context_id.into(),
            state: TaskState::Submitted,
            history: Vec::new(),
            artifacts: Vec::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Non-terminal transitions produce this; `final` MUST be `true` only on the
/// last one emitted for a task (terminal events are instead a bare [`Task`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStatusUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub status: TaskStatusPayload,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskStatusPayload {
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskArtifactUpdateEvent {
    pub task_id: String,
    pub context_id: String,
    pub artifact: Artifact,
    #[serde(default)]
    pub append: bool,
    #[serde(default)]
    pub last_chunk: bool,
}

/// Published to a peer agent's request topic to fan out cancellation (spec
/// §4.7.4): "on `TaskCancelled` for a parent, iterate `active_peer_sub_tasks`
/// and emit `CancelTaskRequest` on each peer's request topic."
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancelTaskRequest {
    pub task_id: String,
}

/// Error codes per spec §6.2: `-32600` invalid, `-32601` method not allowed,
/// `-32001` not found, `-32002` conflict, `-32003` auth denied, `-32004`
/// operation failed, plus the JSON-RPC 2.0 reserved `-32700`/`-32602`/`-32603`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i64)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotAllowed = -32601,
    InvalidParams = -32602,
    InternalError = -32603,
    NotFound = -32001,
    Conflict = -32002,
    AuthDenied = -32003,
    OperationFailed = -32004,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JSONRPCError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JSONRPCError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i64,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Whatever a JSON-RPC `result` or stream event ultimately carries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskEvent {
    Task(Task),
    StatusUpdate(TaskStatusUpdateEvent),
    ArtifactUpdate(TaskArtifactUpdateEvent),
}
