//! Prometheus exporter wiring. The teacher has no metrics crate; `metrics` +
//! `metrics-exporter-prometheus` is the standard pairing for this ambient
//! concern and is recorded as a new dependency in `DESIGN.md`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global recorder and returns a handle whose `render()` method
/// produces the text exposition format for a `/metrics` endpoint. Installing
/// twice in the same process returns an error from the underlying crate;
/// callers should install once at startup.
pub fn install() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub mod names {
    pub const EVENTS_RECEIVED: &str = "mesh_events_received_total";
    pub const TASKS_SUBMITTED: &str = "mesh_tasks_submitted_total";
    pub const TASKS_COMPLETED: &str = "mesh_tasks_completed_total";
    pub const TASKS_FAILED: &str = "mesh_tasks_failed_total";
    pub const TASKS_CANCELED: &str = "mesh_tasks_canceled_total";
    pub const PEER_DELEGATIONS: &str = "mesh_peer_delegations_total";
    pub const COMPACTIONS: &str = "mesh_context_compactions_total";
    pub const SANDBOX_INVOCATIONS: &str = "mesh_sandbox_invocations_total";
    pub const SESSION_STALE_RETRIES: &str = "mesh_session_stale_retries_total";
    pub const EVENTS_DROPPED_NO_CONTEXT: &str = "mesh_events_dropped_no_context_total";
}
