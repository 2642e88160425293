//! End-to-end coverage of the sandbox engine against the real
//! `sandbox-runner` binary (spec scenario S6, property P10): a full
//! subprocess spawn, FIFO status relay, result-file parse, and
//! output-artifact collection.

use std::sync::Arc;

use mesh_core::artifact::ArtifactService;
use mesh_core::sandbox::{SandboxEngine, SandboxInvokeParams, SandboxMode, ToolManifest};

const MANIFEST: &str = r#"
tools:
  render_ascii_art:
    module: sandbox_tools.ascii_art
    function: render
  write_output_file:
    module: sandbox_tools.output_file
    function: write
"#;

fn engine(base_dir: &std::path::Path, manifest_path: &std::path::Path) -> SandboxEngine {
    std::fs::write(manifest_path, MANIFEST).unwrap();
    SandboxEngine::new(
        ToolManifest::new(manifest_path),
        Arc::new(ArtifactService::new()),
        base_dir,
        4,
        env!("CARGO_BIN_EXE_sandbox-runner"),
        SandboxMode::Direct,
    )
}

fn params(tool_name: &str, module: &str, function: &str, args: serde_json::Value) -> SandboxInvokeParams {
    SandboxInvokeParams {
        task_id: "t-1".to_string(),
        tool_name: tool_name.to_string(),
        module: module.to_string(),
        function: function.to_string(),
        args,
        tool_config: serde_json::Value::Null,
        app_name: "demo".to_string(),
        user_id: "u-1".to_string(),
        session_id: "s-1".to_string(),
        preloaded_artifacts: Default::default(),
        artifact_references: Default::default(),
        timeout_seconds: 30,
        sandbox_profile: "standard".to_string(),
    }
}

#[tokio::test]
async fn render_ascii_art_happy_path_produces_nonempty_result_and_no_artifacts() {
    let base = tempfile::tempdir().unwrap();
    let manifest_path = base.path().join("manifest.yaml");
    let engine = engine(base.path(), &manifest_path);

    let result = engine
        .invoke(
            params("render_ascii_art", "sandbox_tools.ascii_art", "render", serde_json::json!({"text": "HI"})),
            |_status| {},
        )
        .await;

    assert!(result.success, "expected success, got {result:?}");
    assert!(!result.timed_out);
    let text = result.result.unwrap()["text"].as_str().unwrap().to_string();
    assert!(!text.is_empty());
    assert!(result.created_artifacts.is_empty());
}

#[tokio::test]
async fn tool_writing_an_output_file_produces_exactly_one_created_artifact() {
    let base = tempfile::tempdir().unwrap();
    let manifest_path = base.path().join("manifest.yaml");
    let engine = engine(base.path(), &manifest_path);

    let result = engine
        .invoke(
            params(
                "write_output_file",
                "sandbox_tools.output_file",
                "write",
                serde_json::json!({"filename": "foo.txt", "content": "hello"}),
            ),
            |_status| {},
        )
        .await;

    assert!(result.success, "expected success, got {result:?}");
    assert_eq!(result.created_artifacts.len(), 1);
    assert_eq!(result.created_artifacts[0].filename, "foo.txt");
}
