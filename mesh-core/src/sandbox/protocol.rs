//! Wire types for sandbox tool invocation (spec §4.10): request/response and
//! status-update payloads, mirroring the original's pydantic models as plain
//! serde structs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PreloadedArtifact {
    pub filename: String,
    /// Base64-encoded content.
    pub content: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub version: u32,
    #[serde(default)]
    pub metadata: Value,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactReference {
    pub filename: String,
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxInvokeParams {
    pub task_id: String,
    pub tool_name: String,
    pub module: String,
    pub function: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub tool_config: Value,
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub preloaded_artifacts: HashMap<String, PreloadedArtifact>,
    #[serde(default)]
    pub artifact_references: HashMap<String, ArtifactReference>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_sandbox_profile")]
    pub sandbox_profile: String,
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_sandbox_profile() -> String {
    "standard".to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxErrorCode {
    SandboxTimeout,
    ExecutionError,
    ToolNotFound,
    ImportError,
    ToolError,
    ArtifactError,
    InvalidRequest,
    InternalError,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreatedArtifact {
    pub filename: String,
    pub version: u32,
    pub mime_type: String,
    pub size: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxInvokeResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub error_code: Option<SandboxErrorCode>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub created_artifacts: Vec<CreatedArtifact>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxStatusUpdate {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoke_params_apply_defaults() {
        let json = serde_json::json!({
            "task_id": "t-1",
            "tool_name": "render_ascii_art",
            "module": "sandbox_tools.ascii_art",
            "function": "render",
            "app_name": "demo",
            "user_id": "u-1",
            "session_id": "s-1",
        });
        let params: SandboxInvokeParams = serde_json::from_value(json).unwrap();
        assert_eq!(params.timeout_seconds, 300);
        assert_eq!(params.sandbox_profile, "standard");
    }

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let value = serde_json::to_value(SandboxErrorCode::ToolNotFound).unwrap();
        assert_eq!(value, serde_json::json!("TOOL_NOT_FOUND"));
    }
}
