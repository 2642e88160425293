//! Named-pipe status relay (spec §4.10 step 6): the sandboxed tool process
//! writes JSON-lines status updates to `status.pipe`; a reader task relays
//! each `status` field to a callback that publishes `SandboxStatusUpdate`s.

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, thiserror::Error)]
pub enum FifoError {
    #[error("mkfifo failed: {0}")]
    Create(std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Creates a FIFO at `path` via the `mkfifo(2)` syscall. No portable std API
/// exists for named pipes, so this is the one place in the sandbox engine
/// that reaches for a raw libc call.
pub fn create_fifo(path: &Path) -> Result<(), FifoError> {
    let c_path = std::ffi::CString::new(path.as_os_str().to_string_lossy().as_bytes())
        .map_err(|e| FifoError::Create(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;
    let result = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if result != 0 {
        return Err(FifoError::Create(std::io::Error::last_os_error()));
    }
    Ok(())
}

pub fn remove_fifo(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Reads JSON-lines from the status FIFO until EOF (the writer closes its
/// end on exit), calling `on_status` with each line's `status` field.
pub async fn relay_status_lines(path: PathBuf, on_status: impl Fn(String) + Send + 'static) -> Result<(), FifoError> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) {
            if let Some(status) = value.get("status").and_then(|s| s.as_str()) {
                on_status(status.to_string());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn relay_status_lines_calls_back_for_each_status_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.pipe");
        create_fifo(&path).unwrap();

        let writer_path = path.clone();
        let writer = tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().write(true).open(&writer_path).unwrap();
            writeln!(f, r#"{{"status": "starting"}}"#).unwrap();
            writeln!(f, r#"{{"status": "running"}}"#).unwrap();
        });

        let statuses = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let statuses_clone = statuses.clone();
        let reader = relay_status_lines(path.clone(), move |s| statuses_clone.lock().unwrap().push(s));

        let (_, reader_result) = tokio::join!(writer, reader);
        reader_result.unwrap();

        let collected = statuses.lock().unwrap().clone();
        assert_eq!(collected, vec!["starting".to_string(), "running".to_string()]);
        remove_fifo(&path);
    }
}
