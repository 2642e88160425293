//! Per-invocation work directory (spec §4.10 steps 2-3): `{base}/{task_id}/
//! {input,output}`, artifact materialisation, and cleanup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;

use crate::artifact::ArtifactService;

use super::protocol::SandboxInvokeParams;

#[derive(Debug, thiserror::Error)]
pub enum WorkdirError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid base64 for preloaded artifact {0}")]
    InvalidBase64(String),
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
}

pub struct TaskWorkdir {
    pub root: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    pub status_pipe: PathBuf,
}

pub fn create_workdir(base: &Path, task_id: &str) -> Result<TaskWorkdir, WorkdirError> {
    let root = base.join(task_id);
    let input = root.join("input");
    let output = root.join("output");
    std::fs::create_dir_all(&input)?;
    std::fs::create_dir_all(&output)?;
    let status_pipe = root.join("status.pipe");
    super::fifo::create_fifo(&status_pipe).map_err(|e| WorkdirError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
    Ok(TaskWorkdir {
        root,
        input,
        output,
        status_pipe,
    })
}

pub fn cleanup_workdir(workdir: &TaskWorkdir) {
    super::fifo::remove_fifo(&workdir.status_pipe);
    let _ = std::fs::remove_dir_all(&workdir.root);
}

/// `param_name → (local_path, mime_type)` for every artifact materialised
/// into `input/` (spec §4.10 step 3).
pub async fn materialize_artifacts(
    params: &SandboxInvokeParams,
    workdir: &TaskWorkdir,
    artifacts: &ArtifactService,
) -> Result<HashMap<String, PathBuf>, WorkdirError> {
    let mut out = HashMap::new();

    for (param_name, preloaded) in &params.preloaded_artifacts {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&preloaded.content)
            .map_err(|_| WorkdirError::InvalidBase64(param_name.clone()))?;
        let local_path = workdir.input.join(&preloaded.filename);
        std::fs::write(&local_path, bytes)?;
        out.insert(param_name.clone(), local_path);
    }

    for (param_name, reference) in &params.artifact_references {
        let version = artifacts
            .load(
                "default",
                &params.user_id,
                &params.session_id,
                &reference.filename,
                reference.version,
            )
            .ok_or_else(|| WorkdirError::ArtifactNotFound(reference.filename.clone()))?;
        let local_path = workdir.input.join(&reference.filename);
        std::fs::write(&local_path, version.bytes.as_ref())?;
        out.insert(param_name.clone(), local_path);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_workdir_makes_input_and_output_dirs() {
        let base = tempfile::tempdir().unwrap();
        let workdir = create_workdir(base.path(), "task-1").unwrap();
        assert!(workdir.input.is_dir());
        assert!(workdir.output.is_dir());
        assert!(workdir.status_pipe.exists());
        cleanup_workdir(&workdir);
        assert!(!workdir.root.exists());
    }
}
