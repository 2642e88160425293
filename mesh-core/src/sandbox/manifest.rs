//! Tool manifest (spec §4.10 step 1): an mtime-watched YAML file mapping
//! `tool_name → {module, function, sandbox_profile, packages}`.
//!
//! Manifest YAML parsing uses `serde_yaml`, already in the teacher's stack.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct ManifestEntry {
    #[serde(default = "default_runtime")]
    pub runtime: String,
    pub module: String,
    pub function: String,
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub sandbox_profile: Option<String>,
}

fn default_runtime() -> String {
    "python".to_string()
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    tools: HashMap<String, ManifestEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("tool {0} not found in manifest")]
    ToolNotFound(String),
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Loads and caches the manifest, reloading when the file's mtime changes on
/// each `resolve` call — the same auto-reload contract as the original
/// Python `ToolManifest`.
pub struct ToolManifest {
    path: PathBuf,
    last_mtime: std::sync::Mutex<Option<SystemTime>>,
    entries: std::sync::Mutex<HashMap<String, ManifestEntry>>,
}

impl ToolManifest {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_mtime: std::sync::Mutex::new(None),
            entries: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn reload_if_stale(&self) -> Result<(), ManifestError> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                *self.entries.lock().expect("manifest entries lock poisoned") = HashMap::new();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let mtime = metadata.modified()?;

        let mut last_mtime = self.last_mtime.lock().expect("manifest mtime lock poisoned");
        if *last_mtime == Some(mtime) {
            return Ok(());
        }

        let raw = std::fs::read_to_string(&self.path)?;
        let parsed: RawManifest = serde_yaml::from_str(&raw)?;
        *self.entries.lock().expect("manifest entries lock poisoned") = parsed.tools;
        *last_mtime = Some(mtime);
        Ok(())
    }

    pub fn resolve(&self, tool_name: &str) -> Result<ManifestEntry, ManifestError> {
        self.reload_if_stale()?;
        self.entries
            .lock()
            .expect("manifest entries lock poisoned")
            .get(tool_name)
            .cloned()
            .ok_or_else(|| ManifestError::ToolNotFound(tool_name.to_string()))
    }
}

pub fn parse_manifest_str(yaml: &str) -> Result<HashMap<String, ManifestEntry>, ManifestError> {
    let raw: RawManifest = serde_yaml::from_str(yaml)?;
    Ok(raw.tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
version: 1
tools:
  render_ascii_art:
    module: sandbox_tools.ascii_art
    function: render
    sandbox_profile: standard
  slow_tool:
    runtime: python
    module: sandbox_tools.slow
    function: run
    timeout_seconds: 600
"#;

    #[test]
    fn parses_tool_entries_with_defaults() {
        let entries = parse_manifest_str(SAMPLE).unwrap();
        let render = &entries["render_ascii_art"];
        assert_eq!(render.runtime, "python");
        assert_eq!(render.function, "render");
        assert_eq!(render.sandbox_profile.as_deref(), Some("standard"));

        let slow = &entries["slow_tool"];
        assert_eq!(slow.timeout_seconds, Some(600));
    }

    #[test]
    fn resolve_reloads_on_mtime_change() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "tools:\n  a:\n    module: m\n    function: f\n").unwrap();
        let manifest = ToolManifest::new(file.path());

        assert!(manifest.resolve("a").is_ok());
        assert!(manifest.resolve("b").is_err());
    }

    #[test]
    fn missing_manifest_file_resolves_to_not_found() {
        let manifest = ToolManifest::new("/nonexistent/path/manifest.yaml");
        assert!(matches!(manifest.resolve("anything"), Err(ManifestError::ToolNotFound(_))));
    }
}
