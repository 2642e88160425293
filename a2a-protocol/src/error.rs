use thiserror::Error;

/// Protocol-layer failures: malformed envelope, unknown method, id mismatch
/// (spec §6.3 taxonomy (a), "Protocol").
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
    #[error("response id {got:?} does not match request id {expected:?}")]
    IdMismatch { expected: String, got: String },
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("invalid namespace: {0}")]
    Namespace(#[from] crate::topics::NamespaceError),
}
