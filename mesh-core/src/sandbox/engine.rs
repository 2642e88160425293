//! Sandbox Engine (C10): orchestrates one tool invocation end to end —
//! manifest resolution, work dir + FIFO setup, artifact materialisation,
//! runner spawn, status relay, timeout, and artifact collection.
//!
//! Grounded on `loom::tool_source::{bash_tools_source, context}` for the
//! "spawn a subprocess, capture output, wrap errors" shape, generalized to
//! the full manifest + FIFO status relay + resource-limit pipeline.

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::artifact::ArtifactService;

use super::fifo::relay_status_lines;
use super::limits::ResourceLimits;
use super::manifest::{ManifestError, ToolManifest};
use super::protocol::{CreatedArtifact, SandboxErrorCode, SandboxInvokeParams, SandboxInvokeResult};
use super::workdir::{cleanup_workdir, create_workdir, materialize_artifacts, WorkdirError};

/// Invocation mode (spec §4.10 step 5): `isolated` wraps the runner binary
/// in a namespace+rlimit sandbox wrapper; `direct` runs it as a plain
/// subprocess, inheriting a limited env (dev only).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SandboxMode {
    Isolated,
    Direct,
}

#[derive(Serialize)]
struct RunnerArgs<'a> {
    module: &'a str,
    function: &'a str,
    args: &'a serde_json::Value,
    tool_config: &'a serde_json::Value,
    user_id: &'a str,
    session_id: &'a str,
    app_name: &'a str,
    artifact_paths: &'a std::collections::HashMap<String, PathBuf>,
    status_pipe: &'a PathBuf,
    result_file: &'a PathBuf,
    output_dir: &'a PathBuf,
}

#[derive(Deserialize)]
struct RunnerResult {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxEngineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Workdir(#[from] WorkdirError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct SandboxEngine {
    manifest: ToolManifest,
    artifacts: Arc<ArtifactService>,
    base_dir: PathBuf,
    limits: ResourceLimits,
    concurrency: Semaphore,
    /// Path to the runner executable; receives the `runner_args.json` path
    /// as its sole argument and writes `result.json` into the output dir.
    runner_bin: PathBuf,
    mode: SandboxMode,
}

impl SandboxEngine {
    pub fn new(
        manifest: ToolManifest,
        artifacts: Arc<ArtifactService>,
        base_dir: impl Into<PathBuf>,
        max_concurrent_executions: usize,
        runner_bin: impl Into<PathBuf>,
        mode: SandboxMode,
    ) -> Self {
        Self {
            manifest,
            artifacts,
            base_dir: base_dir.into(),
            limits: ResourceLimits::default(),
            concurrency: Semaphore::new(max_concurrent_executions),
            runner_bin: runner_bin.into(),
            mode,
        }
    }

    pub async fn invoke(
        &self,
        params: SandboxInvokeParams,
        on_status: impl Fn(String) + Send + 'static,
    ) -> SandboxInvokeResult {
        match self.invoke_inner(&params, on_status).await {
            Ok(result) => result,
            Err(SandboxEngineError::Manifest(ManifestError::ToolNotFound(name))) => error_result(
                &params.task_id,
                SandboxErrorCode::ToolNotFound,
                format!("tool not found: {name}"),
            ),
            Err(e) => error_result(&params.task_id, SandboxErrorCode::InternalError, e.to_string()),
        }
    }

    async fn invoke_inner(
        &self,
        params: &SandboxInvokeParams,
        on_status: impl Fn(String) + Send + 'static,
    ) -> Result<SandboxInvokeResult, SandboxEngineError> {
        self.manifest.resolve(&params.tool_name)?;

        let _permit = self.concurrency.acquire().await.expect("semaphore never closed");

        let workdir = create_workdir(&self.base_dir, &params.task_id)?;

        let artifact_paths = match materialize_artifacts(params, &workdir, &self.artifacts).await {
            Ok(paths) => paths,
            Err(e) => {
                cleanup_workdir(&workdir);
                return Err(SandboxEngineError::Workdir(e));
            }
        };

        let result_file = workdir.root.join("result.json");
        let runner_args_path = workdir.root.join("runner_args.json");
        let runner_args = RunnerArgs {
            module: &params.module,
            function: &params.function,
            args: &params.args,
            tool_config: &params.tool_config,
            user_id: &params.user_id,
            session_id: &params.session_id,
            app_name: &params.app_name,
            artifact_paths: &artifact_paths,
            status_pipe: &workdir.status_pipe,
            result_file: &result_file,
            output_dir: &workdir.output,
        };
        std::fs::write(&runner_args_path, serde_json::to_vec_pretty(&runner_args)?)?;

        let status_relay = tokio::spawn(relay_status_lines(workdir.status_pipe.clone(), on_status));

        let mut command = self.build_command(&runner_args_path);
        let mut child = command.spawn()?;

        let timeout = Duration::from_secs(params.timeout_seconds + 5);
        let wait_result = tokio::time::timeout(timeout, child.wait()).await;
        status_relay.abort();

        let timed_out = wait_result.is_err();
        if timed_out {
            let _ = child.kill().await;
            cleanup_workdir(&workdir);
            record_sandbox_exit("timeout");
            return Ok(SandboxInvokeResult {
                task_id: params.task_id.clone(),
                success: false,
                timed_out: true,
                error_code: Some(SandboxErrorCode::SandboxTimeout),
                error_message: Some("tool execution timed out".to_string()),
                result: None,
                created_artifacts: vec![],
            });
        }

        let status = wait_result.expect("checked above")?;
        if !status.success() {
            cleanup_workdir(&workdir);
            record_sandbox_exit("execution_error");
            return Ok(error_result(
                &params.task_id,
                SandboxErrorCode::ExecutionError,
                format!("runner exited with status {status}"),
            ));
        }

        let raw_result = std::fs::read_to_string(&result_file).unwrap_or_default();
        let parsed: RunnerResult = serde_json::from_str(&raw_result).unwrap_or(RunnerResult { error: None, result: None });
        if let Some(error) = parsed.error {
            cleanup_workdir(&workdir);
            record_sandbox_exit("tool_error");
            return Ok(error_result(&params.task_id, SandboxErrorCode::ToolError, error));
        }

        let created_artifacts = collect_output_artifacts(
            &workdir.output,
            &self.artifacts,
            "default",
            &params.user_id,
            &params.session_id,
            crate::async_task::system_clock(),
        )
        .unwrap_or_default();

        cleanup_workdir(&workdir);

        record_sandbox_exit("success");
        Ok(SandboxInvokeResult {
            task_id: params.task_id.clone(),
            success: true,
            timed_out: false,
            error_code: None,
            error_message: None,
            result: parsed.result,
            created_artifacts,
        })
    }

    fn build_command(&self, runner_args_path: &PathBuf) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.runner_bin);
        command.arg(runner_args_path).env_clear();
        command.env("PATH", "/usr/bin:/bin");

        if self.mode == SandboxMode::Isolated {
            let limits = self.limits;
            unsafe {
                command.pre_exec(move || super::limits::apply_resource_limits(&limits));
            }
        }
        command
    }
}

/// Collects every file under the output dir into the artifact service,
/// assigning a version each (spec §4.10 step 8). Split out so a caller with
/// a real clock/mime sniffer can supply `created_at`.
pub fn collect_output_artifacts(
    output_dir: &std::path::Path,
    artifacts: &ArtifactService,
    scope: &str,
    user: &str,
    session: &str,
    created_at: i64,
) -> std::io::Result<Vec<CreatedArtifact>> {
    let mut out = Vec::new();
    if !output_dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(output_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().to_string();
        let bytes = std::fs::read(entry.path())?;
        let size = bytes.len() as u64;
        let version = artifacts.save(scope, user, session, &filename, bytes, "application/octet-stream", created_at);
        out.push(CreatedArtifact {
            filename,
            version,
            mime_type: "application/octet-stream".to_string(),
            size,
        });
    }
    Ok(out)
}

/// Increments the sandbox-executions-by-exit-reason counter spec §4.14
/// requires.
fn record_sandbox_exit(reason: &'static str) {
    metrics::counter!(mesh_config::metrics_init::names::SANDBOX_INVOCATIONS, "reason" => reason).increment(1);
}

fn error_result(task_id: &str, code: SandboxErrorCode, message: impl Into<String>) -> SandboxInvokeResult {
    SandboxInvokeResult {
        task_id: task_id.to_string(),
        success: false,
        timed_out: false,
        error_code: Some(code),
        error_message: Some(message.into()),
        result: None,
        created_artifacts: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_output_artifacts_handles_missing_output_dir() {
        let svc = ArtifactService::new();
        let result = collect_output_artifacts(std::path::Path::new("/nonexistent"), &svc, "ns", "u", "s", 0).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn collect_output_artifacts_saves_each_file() {
        let svc = ArtifactService::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.csv"), b"a,b,c").unwrap();
        std::fs::write(dir.path().join("chart.png"), b"\x89PNG").unwrap();

        let created = collect_output_artifacts(dir.path(), &svc, "ns", "u", "s", 42).unwrap();
        assert_eq!(created.len(), 2);
        let loaded = svc.load("ns", "u", "s", "report.csv", None).unwrap();
        assert_eq!(*loaded.bytes, b"a,b,c".to_vec());
    }
}
