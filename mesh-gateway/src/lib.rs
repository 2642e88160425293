//! Gateway Core (C8): bridges one external transport to the mesh.
//!
//! [`submit`] implements task submission (§4.8.1); [`bridge`] implements the
//! bridge loop that consumes the gateway's broker subscriptions and
//! forwards resolved events to the external transport (§4.8.2); [`context_manager`]
//! is the Task Context Manager (§4.8.3); [`transport`] is a reference
//! WebSocket transport wiring the two together.

pub mod bridge;
pub mod context_manager;
pub mod submit;
pub mod transport;

pub use bridge::{spawn_gateway, GatewayBridge, GatewayOutbound, OutboundEvent};
pub use context_manager::TaskContextManager;
pub use submit::{submit_a2a_task, AccessValidator, AllowAllAccessValidator, SubmitError, SubmitRequest, UserIdentity};
pub use transport::{router, ConnectionRegistry, GatewayAppState};
