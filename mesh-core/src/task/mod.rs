//! Agent Task Core (C7) — the hardest part: per-task state machine, LLM
//! driver loop, tool dispatch, peer delegation, context compaction, and
//! the streaming text buffer.

mod barrier;
mod buffer;
mod compaction;
mod context;
mod driver;
mod peer;
mod runtime;
mod types;

pub use barrier::{NamedBarrier, UnknownName};
pub use buffer::StreamingBuffer;
pub use compaction::{
    compact_once, compact_with_retry, CompactionConfig, CompactionError, CompactionEvent, CompactionLocks,
    PendingNotifications, Summarizer, TokenCounter,
};
pub use context::{TaskContext, TaskContextRegistry};
pub use driver::{LlmDriver, StepResult, TaskDriver, TaskDriverConfig};
pub use peer::{cancel_active_sub_tasks, PeerCoordinator, PeerResult, PeerSubTask};
pub use runtime::AgentTaskComponent;
pub use types::{
    assistant_message, is_context_overflow_message, terminal_task, DriverError, DriverOutcome, LlmTurn, ToolCall,
    ToolCallId, ToolResponse, CONTEXT_OVERFLOW_INDICATORS,
};
