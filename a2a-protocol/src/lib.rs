//! Wire protocol for the agent mesh: topic taxonomy, JSON-RPC envelope,
//! broker user-properties, and the `Task`/`Message`/`Part` result types.

pub mod envelope;
pub mod error;
pub mod topics;
pub mod wire;

pub use envelope::{JsonRpcRequest, JsonRpcResponse, UserProperties, JSONRPC_VERSION};
pub use error::ProtocolError;
pub use topics::{Namespace, NamespaceError};
pub use wire::{
    Artifact, CancelTaskRequest, ErrorCode, FileVariant, JSONRPCError, Message, Part, Role, Task,
    TaskArtifactUpdateEvent, TaskEvent, TaskState, TaskStatusPayload, TaskStatusUpdateEvent,
};
