//! Agent mesh core: App Host, Agent Registry, Session/Event Store, Artifact
//! Service, Agent Task Core, Async Human-Task Service, Sandbox Engine, and
//! the Embed Resolver — everything that runs inside one App process apart
//! from the external-transport-facing Gateway and Control Plane crates.

pub mod app;
pub mod artifact;
pub mod async_task;
pub mod embed;
mod error;
pub mod registry;
pub mod sandbox;
pub mod session;
pub mod task;

pub use error::MeshError;
