//! `sandbox-runner`: the subprocess entry point
//! `mesh_core::sandbox::engine::SandboxEngine` spawns for each tool
//! invocation. Takes the path to a `runner_args.json` as its sole argument,
//! dispatches `(module, function)` to a registered tool, relays status
//! lines over the named-pipe the engine already created, and writes
//! `result.json` for the engine to read back.
//!
//! Grounded on the engine's own `RunnerArgs`/`RunnerResult` shapes
//! (`mesh-core/src/sandbox/engine.rs`) — this binary is the other half of
//! that private wire contract.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
struct RunnerArgs {
    module: String,
    function: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    tool_config: Value,
    #[allow(dead_code)]
    user_id: String,
    #[allow(dead_code)]
    session_id: String,
    #[allow(dead_code)]
    app_name: String,
    artifact_paths: HashMap<String, PathBuf>,
    status_pipe: PathBuf,
    result_file: PathBuf,
    output_dir: PathBuf,
}

#[derive(Serialize)]
struct RunnerResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
}

/// Status lines are best-effort: the engine already aborts its relay task
/// once the process exits, so a write that fails because nothing is
/// reading anymore is not itself a runner error.
fn write_status(status_pipe: &PathBuf, status: &str) {
    if let Ok(mut f) = std::fs::OpenOptions::new().write(true).open(status_pipe) {
        let _ = writeln!(f, "{}", serde_json::json!({ "status": status }));
    }
}

fn main() -> ExitCode {
    let Some(args_path) = std::env::args().nth(1) else {
        eprintln!("sandbox-runner: missing runner_args.json path argument");
        return ExitCode::FAILURE;
    };

    let raw = match std::fs::read(&args_path) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("sandbox-runner: failed to read {args_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let runner_args: RunnerArgs = match serde_json::from_slice(&raw) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("sandbox-runner: malformed runner args: {e}");
            return ExitCode::FAILURE;
        }
    };

    write_status(&runner_args.status_pipe, "starting");

    let outcome = match mesh_cli::tools::lookup(&runner_args.module, &runner_args.function) {
        None => RunnerResult {
            error: Some(format!("unknown tool {}.{}", runner_args.module, runner_args.function)),
            result: None,
        },
        Some(tool_fn) => {
            write_status(&runner_args.status_pipe, "running");
            match tool_fn(runner_args.args.clone(), runner_args.tool_config.clone(), &runner_args.artifact_paths, &runner_args.output_dir) {
                Ok(result) => RunnerResult { error: None, result: Some(result) },
                Err(message) => RunnerResult { error: Some(message), result: None },
            }
        }
    };

    write_status(&runner_args.status_pipe, "done");

    let payload = serde_json::to_vec_pretty(&outcome).unwrap_or_default();
    if let Err(e) = std::fs::write(&runner_args.result_file, payload) {
        eprintln!("sandbox-runner: failed to write result file: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
