//! Demonstration sandboxed tool exercising the output-artifact path (spec
//! property P10): writes one file into the sandbox output dir so the engine
//! picks it up into the artifact service.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

pub fn write(args: Value, _tool_config: Value, _artifact_paths: &HashMap<String, PathBuf>, output_dir: &Path) -> Result<Value, String> {
    let filename = args
        .get("filename")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing required arg 'filename'".to_string())?;
    let content = args.get("content").and_then(Value::as_str).unwrap_or("");

    std::fs::write(output_dir.join(filename), content).map_err(|e| format!("failed to write {filename}: {e}"))?;

    Ok(serde_json::json!({ "wrote": filename }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_the_named_file_into_the_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = write(
            serde_json::json!({"filename": "foo.txt", "content": "hi"}),
            Value::Null,
            &HashMap::new(),
            dir.path(),
        )
        .unwrap();
        assert_eq!(result["wrote"], "foo.txt");
        assert_eq!(std::fs::read_to_string(dir.path().join("foo.txt")).unwrap(), "hi");
    }

    #[test]
    fn missing_filename_arg_is_an_error() {
        let result = write(serde_json::json!({}), Value::Null, &HashMap::new(), Path::new("/tmp"));
        assert!(result.is_err());
    }
}
