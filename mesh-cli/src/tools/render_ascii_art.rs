//! Demonstration sandboxed tool (spec scenario S6): renders a short string
//! as block-letter ASCII art, the way the original used `pyfiglet`.
//!
//! Crate: `figlet-rs` — the closest ecosystem equivalent to `pyfiglet`;
//! new dependency, recorded in `DESIGN.md`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use figlet_rs::FIGfont;
use serde_json::Value;

pub fn render(args: Value, _tool_config: Value, _artifact_paths: &HashMap<String, PathBuf>, _output_dir: &Path) -> Result<Value, String> {
    let start = Instant::now();
    let text = args
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| "missing required arg 'text'".to_string())?;

    let font = FIGfont::standard().map_err(|e| format!("failed to load font: {e}"))?;
    let figure = font.convert(text).ok_or_else(|| "figlet produced no output".to_string())?;

    // Sub-millisecond renders still count as having run.
    let execution_time_ms = start.elapsed().as_millis().max(1) as u64;

    Ok(serde_json::json!({
        "text": figure.to_string(),
        "execution_time_ms": execution_time_ms,
    }))
}
