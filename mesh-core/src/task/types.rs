use a2a_protocol::{Message, Part, Task, TaskState};
use serde_json::Value;

/// Ids an LLM turn reported as long-running: the driver loop parks them in
/// `pending_long_running_tools` until a matching `function_response` arrives
/// (spec §4.7.2).
pub type ToolCallId = String;

#[derive(Clone, Debug)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: Value,
    pub long_running: bool,
}

#[derive(Clone, Debug)]
pub struct ToolResponse {
    pub call_id: ToolCallId,
    pub payload: Value,
}

/// One turn of driving the LLM: either it produced a final assistant
/// message, or it made tool calls the driver loop must dispatch. Grounded on
/// `loom::llm::LlmClient`'s non-streaming `invoke()` shape — mesh-core's
/// driver abstracts over individual SSE chunks at this boundary and deals
/// only in assembled turns, since the chunk-level replay isn't itself part
/// of any invariant this crate must satisfy.
#[derive(Clone, Debug, Default)]
pub struct LlmTurn {
    pub text: String,
    pub invocation_id: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    /// The turn finished; caller should finalize with a terminal event.
    Done,
    /// Long-running tools are still pending; the task pauses.
    Paused,
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("context window overflow: {0}")]
    ContextOverflow(String),
    #[error("llm call limit exceeded")]
    LlmCallsLimitExceeded,
    #[error("task was cancelled")]
    Cancelled,
    #[error("broker send failed: {0}")]
    BrokerSend(String),
    #[error("session persistence failed: {0}")]
    SessionPersistence(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Substrings identifying a context-overflow error from the underlying LLM
/// client (spec §4.7.3).
pub const CONTEXT_OVERFLOW_INDICATORS: &[&str] = &[
    "too many tokens",
    "maximum context length",
    "context length exceeded",
    "input is too long",
    "prompt is too long",
    "context_length_exceeded",
    "token limit",
];

pub fn is_context_overflow_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONTEXT_OVERFLOW_INDICATORS.iter().any(|needle| lower.contains(needle))
}

/// Builds the terminal `Task` (§4.7.1: only terminal states produce a final
/// `Task` event).
pub fn terminal_task(mut task: Task, state: TaskState) -> Task {
    debug_assert!(state.is_terminal());
    task.state = state;
    task
}

pub fn assistant_message(text: impl Into<String>) -> Message {
    Message {
        role: a2a_protocol::Role::Agent,
        parts: vec![Part::TextPart { text: text.into() }],
        metadata: Default::default(),
    }
}
