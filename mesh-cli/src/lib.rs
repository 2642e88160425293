//! Shared pieces between the `mesh-cli` dev-server binary and the
//! `sandbox-runner` subprocess entry point: the demonstration tool
//! registry both can dispatch into.

pub mod tools;
