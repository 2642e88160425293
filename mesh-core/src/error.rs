use thiserror::Error;

/// Taxonomy from spec §7: protocol errors live in `a2a_protocol::ProtocolError`;
/// everything with mesh-side state lives here.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("authorization denied: {0}")]
    AuthDenied(String),
    #[error("session conflict: {0}")]
    SessionConflict(#[from] crate::session::StaleSessionError),
    #[error("context window overflow could not be resolved: {0}")]
    ContextOverflow(String),
    #[error("peer task failed: {0}")]
    PeerFailure(String),
    #[error("sandbox failure: {0}")]
    SandboxFailure(String),
    #[error("task was cancelled")]
    Cancelled,
    #[error("broker error: {0}")]
    Broker(#[from] mesh_broker::BrokerError),
    #[error("internal error: {0}")]
    Internal(String),
}
