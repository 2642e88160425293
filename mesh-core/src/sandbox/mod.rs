//! Sandbox Engine (C10): process-isolated tool execution behind a manifest,
//! a FIFO status relay, resource limits, and a concurrency gate.

mod engine;
mod fifo;
mod limits;
mod manifest;
mod protocol;
mod workdir;

pub use engine::{collect_output_artifacts, SandboxEngine, SandboxEngineError, SandboxMode};
pub use fifo::FifoError;
pub use limits::ResourceLimits;
pub use manifest::{ManifestEntry, ManifestError, ToolManifest};
pub use protocol::{
    ArtifactReference, CreatedArtifact, PreloadedArtifact, SandboxErrorCode, SandboxInvokeParams, SandboxInvokeResult,
    SandboxStatusUpdate,
};
pub use workdir::{create_workdir, materialize_artifacts, TaskWorkdir, WorkdirError};
