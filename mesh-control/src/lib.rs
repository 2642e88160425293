//! Control Plane Service (C11): JSON-RPC-over-topic REST emulation for the
//! apps a process hosts. [`registry`] is the app table and pluggable
//! create-factory; [`service`] is the topic parser, authorization check,
//! and CRUD dispatch.

pub mod registry;
pub mod service;

pub use registry::{AppFactory, AppRegistry, CreateAppError, DefaultAppFactory};
pub use service::{spawn_control_plane, run_control_loop, ControlError, ControlPlaneService};
